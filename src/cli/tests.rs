//! Unit tests for CLI commands

use std::sync::Arc;

use crate::app::{build_dispatcher, AppState};
use crate::cli::{route_table, Cli, Commands};
use crate::config::{AppConfig, Environment};
use clap::Parser;

#[test]
fn test_serve_flags_parse() {
    let cli = Cli::try_parse_from([
        "genai-api",
        "serve",
        "--addr",
        "127.0.0.1:9100",
        "--env",
        "production",
        "--workers",
        "2",
    ])
    .unwrap();

    match cli.command {
        Commands::Serve { addr, env, workers } => {
            assert_eq!(addr.unwrap().port(), 9100);
            assert_eq!(env, Some(Environment::Production));
            assert_eq!(workers, Some(2));
        }
        Commands::Routes => panic!("Expected Serve command"),
    }
}

#[test]
fn test_serve_defaults_to_environment() {
    let cli = Cli::try_parse_from(["genai-api", "serve"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Serve {
            addr: None,
            env: None,
            workers: None
        }
    ));
}

#[test]
fn test_zero_workers_rejected() {
    assert!(Cli::try_parse_from(["genai-api", "serve", "--workers", "0"]).is_err());
    assert!(Cli::try_parse_from(["genai-api", "serve", "--env", "staging"]).is_err());
}

#[test]
fn test_route_table_lists_dependency_order() {
    let state = Arc::new(AppState::with_defaults().unwrap());
    let dispatcher = build_dispatcher(state, &AppConfig::default()).unwrap();
    let table = route_table(&dispatcher);

    assert_eq!(table.len(), 14);
    let chat = table
        .iter()
        .find(|line| line.contains("create_chat_completion"))
        .unwrap();
    assert!(chat.starts_with("POST"));
    assert!(chat.ends_with(
        "api_key -> current_user -> chat_body -> settings -> requested_model -> token_ceiling -> provider_credential -> token_usage -> rate_limit"
    ));
    let health = table.iter().find(|line| line.contains("/health")).unwrap();
    assert!(health.ends_with(" -"));
}
