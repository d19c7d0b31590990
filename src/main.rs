use std::{process, sync::Arc};

use fragcache::{
    cache::{CacheGate, CallArgs, FixedLocale, Widget},
    config::{self, ExpireArgs, KeyArgs, Settings, TokenArgs},
    infra::{error::InfraError, telemetry},
};
use serde_json::Value;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    if settings.cache.driver != "file" {
        warn!(
            driver = %settings.cache.driver,
            "driver keeps its state in process memory; changes do not outlive this command"
        );
    }

    match cli_args.command {
        config::Command::Expire(args) => run_expire(&settings, args).await,
        config::Command::Token(args) => run_token(&settings, args).await,
        config::Command::Key(args) => run_key(&settings, args).await,
    }
}

fn open_gate(
    settings: &Settings,
    locale: Option<String>,
) -> Result<CacheGate<fragcache::cache::Backend>, InfraError> {
    let locale = locale.unwrap_or_else(|| settings.cache.default_locale.clone());
    Ok(CacheGate::from_config(
        &settings.cache,
        Arc::new(FixedLocale::new(locale)),
    )?)
}

async fn run_expire(settings: &Settings, args: ExpireArgs) -> Result<(), InfraError> {
    let gate = open_gate(settings, None)?;
    gate.expire_tagged(args.tags.iter().cloned()).await?;

    info!(
        driver = %settings.cache.driver,
        tags = ?args.tags,
        "Expired tagged widgets"
    );
    println!("expired {} tag(s)", args.tags.len());
    Ok(())
}

async fn run_token(settings: &Settings, args: TokenArgs) -> Result<(), InfraError> {
    let gate = open_gate(settings, None)?;
    let token = gate.tokens().token_for(&args.tag).await?;
    println!("{token}");
    Ok(())
}

async fn run_key(settings: &Settings, args: KeyArgs) -> Result<(), InfraError> {
    let gate = open_gate(settings, args.locale.clone())?;

    let mut call_args = CallArgs::new();
    for (index, raw) in args.args.iter().enumerate() {
        let value: Value = serde_json::from_str(raw).map_err(|err| {
            InfraError::input(format!("argument {index} is not valid JSON: {err}"))
        })?;
        call_args = call_args.with(value);
    }

    let widget = Widget::new(args.type_name, args.template).with_tags(args.tags);
    let key = gate
        .keys()
        .make_key(&call_args, &widget, args.form.into())
        .await?;
    println!("{key}");
    Ok(())
}
