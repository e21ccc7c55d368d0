//! Privlex application binary - composition root.
//!
//! 1. Load configuration from TOML and apply `PRIVLEX_*` overrides
//! 2. Connect the HTTP providers that are configured
//! 3. Build the orchestrator
//! 4. Answer one question (`ask`) or run an interactive session (`chat`)

mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use privlex_agents::mock::{MockEmbedder, StaticStore};
use privlex_agents::{
    Answer, ChatModel, Embedder, Orchestrator, VectorStore, WebSearchProvider,
};
use privlex_core::config::PrivlexConfig;
use privlex_core::error::PrivlexError;
use privlex_core::types::Role;
use privlex_providers::{AzureChatModel, AzureEmbedder, ElasticsearchStore, TavilySearch};

use cli::{CliArgs, Command};

/// Dimension of the offline embedder used when no embedding deployment is configured.
const OFFLINE_EMBEDDING_DIM: usize = 256;

/// Load the configuration file, falling back to defaults. The load error is
/// handed back so it can be logged once tracing is up.
fn load_config(path: &Path) -> (PrivlexConfig, Option<PrivlexError>) {
    match PrivlexConfig::load(path) {
        Ok(config) => (config, None),
        Err(e) => (PrivlexConfig::default(), Some(e)),
    }
}

fn build_orchestrator(config: &PrivlexConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let providers = &config.providers;
    let model_timeout = config.timeouts.model();

    let embedder: Arc<dyn Embedder> = if providers.embeddings.is_configured() {
        Arc::new(AzureEmbedder::new(&providers.embeddings, model_timeout)?)
    } else {
        tracing::warn!("No embedding deployment configured; using offline embedder");
        Arc::new(MockEmbedder::new(OFFLINE_EMBEDDING_DIM))
    };

    let store: Arc<dyn VectorStore> = if providers.elasticsearch.is_configured() {
        tracing::info!(url = %providers.elasticsearch.url, "Elasticsearch store configured");
        Arc::new(ElasticsearchStore::new(
            &providers.elasticsearch,
            embedder,
            config.timeouts.retrieval(),
        )?)
    } else {
        tracing::warn!("No vector store configured; corpora will return no evidence");
        Arc::new(StaticStore::new())
    };

    let mut builder = Orchestrator::builder(config.clone()).store(store);

    if providers.chat.is_configured() {
        let model: Arc<dyn ChatModel> = Arc::new(AzureChatModel::new(&providers.chat, model_timeout)?);
        builder = builder.chat_model(model);
        tracing::info!(deployment = %providers.chat.deployment, "Chat model configured");
    } else {
        tracing::warn!("No chat model configured; answers will be extractive");
    }

    if config.web_search.enabled && providers.tavily.is_configured() {
        let web: Arc<dyn WebSearchProvider> = Arc::new(TavilySearch::new(
            &providers.tavily,
            &config.web_search.search_depth,
            config.timeouts.web_search(),
        )?);
        builder = builder.web_search(web);
        tracing::info!("Web search configured");
    } else if config.web_search.enabled {
        tracing::warn!("Web search enabled but no Tavily API key configured");
    }

    Ok(builder.build()?)
}

fn render_answer(answer: &Answer) -> String {
    let mut out = answer.text.clone();
    if !answer.citations.is_empty() {
        out.push_str("\n\nSources:");
        for citation in &answer.citations {
            out.push_str(&format!("\n  - {}", citation.label()));
        }
    }
    if answer.used_web_fallback {
        out.push_str("\n\n(corpus evidence was supplemented by web search)");
    }
    out
}

async fn ask(
    orchestrator: &Orchestrator,
    session_id: &str,
    question: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let answer = orchestrator.answer(session_id, question).await?;
    println!("{}", render_answer(&answer));
    Ok(())
}

async fn chat(orchestrator: &Orchestrator, session_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Privlex chat (session {session_id}). Commands: /reset, /history, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                orchestrator.reset_session(session_id)?;
                println!("Session cleared.");
            }
            "/history" => {
                let history = orchestrator.history(session_id)?;
                if history.is_empty() {
                    println!("(no messages yet)");
                }
                for message in history {
                    let speaker = match message.role {
                        Role::User => "you",
                        Role::Assistant => "privlex",
                    };
                    println!("{} {}: {}", message.timestamp.format("%H:%M:%S"), speaker, message.text);
                }
            }
            question => match orchestrator.answer(session_id, question).await {
                Ok(answer) => println!("{}\n", render_answer(&answer)),
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Question failed");
                    println!("Sorry, the question could not be answered: {e}\n");
                }
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    // Load failures are reported once tracing is installed below.
    let (mut config, load_error) = load_config(&config_file);
    config.apply_env_overrides();
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Privlex v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    let orchestrator = build_orchestrator(&config)?;
    let session_id = args.resolve_session_id();

    match args.command() {
        Command::Ask { question } => ask(&orchestrator, &session_id, &question.join(" ")).await,
        Command::Chat => chat(&orchestrator, &session_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_missing_file_keeps_error() {
        let (config, error) = load_config(Path::new("/does/not/exist/privlex.toml"));
        assert_eq!(config.retrieval.k, PrivlexConfig::default().retrieval.k);
        assert!(matches!(error, Some(PrivlexError::Io(_))));
    }

    #[test]
    fn test_render_answer_lists_sources() {
        let answer = Answer {
            text: "Notify within 72 hours [1].".to_string(),
            citations: vec![privlex_core::types::Citation {
                source: "gdpr".to_string(),
                locator: "Art. 33".to_string(),
                excerpt: "72 hours".to_string(),
            }],
            used_web_fallback: false,
        };
        let rendered = render_answer(&answer);
        assert!(rendered.starts_with("Notify within 72 hours [1]."));
        assert!(rendered.contains("  - gdpr / Art. 33"));
        assert!(!rendered.contains("web search"));
    }
}
