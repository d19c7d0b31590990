//! Widget rendering through the fragment cache.
//!
//! A widget is rendered in two steps: its controller produces data, then the
//! template engine turns the presented data into markup. Widgets that cache
//! their view store the finished markup. The others store only the data and
//! render the template on every call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::cache::{CacheBackend, CacheError, CacheGate, CallArgs, OutputForm, Widget};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("widget `{widget}` failed to produce data: {reason}")]
    Data { widget: String, reason: String },
    #[error("template `{template}` failed to render: {reason}")]
    Template { template: String, reason: String },
}

impl RenderError {
    pub fn data(widget: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Data {
            widget: widget.into(),
            reason: reason.into(),
        }
    }

    pub fn template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            reason: reason.into(),
        }
    }
}

/// Produces the data a widget renders.
#[async_trait]
pub trait WidgetController: Send + Sync {
    async fn data(&self, args: &CallArgs) -> Result<Value, RenderError>;

    /// Shape the data into the template context. Identity by default.
    fn present(&self, data: Value) -> Value {
        data
    }
}

pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<String, RenderError>;
}

pub struct WidgetRenderer<B> {
    gate: Arc<CacheGate<B>>,
    templates: Arc<dyn TemplateEngine>,
}

impl<B: CacheBackend> WidgetRenderer<B> {
    pub fn new(gate: Arc<CacheGate<B>>, templates: Arc<dyn TemplateEngine>) -> Self {
        Self { gate, templates }
    }

    pub fn gate(&self) -> &Arc<CacheGate<B>> {
        &self.gate
    }

    #[instrument(skip_all, fields(widget = widget.type_name(), cache_view = widget.cache_view()))]
    pub async fn render(
        &self,
        widget: &Widget,
        controller: &dyn WidgetController,
        args: &CallArgs,
    ) -> Result<String, RenderError> {
        if widget.cache_view() {
            return self
                .gate
                .cache_result(args, widget, OutputForm::Html, || async {
                    let data = controller.data(args).await?;
                    self.templates
                        .render(widget.template(), &controller.present(data))
                })
                .await;
        }

        let data: Value = self
            .gate
            .cache_result(args, widget, OutputForm::Data, || controller.data(args))
            .await?;
        self.templates
            .render(widget.template(), &controller.present(data))
    }
}
