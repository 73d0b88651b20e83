use financial_chat_orchestrator::{
    collaborators::{
        ChartStore, DocumentService, FsChartStore, HttpDocumentService, HttpWebFetcher,
        InMemoryChartStore, InMemoryDocumentService,
    },
    llm::GeminiClient,
    session::{InMemorySessionStore, PostgresSessionStore, SessionStore},
    tools::ToolServices,
    Orchestrator, OrchestratorConfig,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: orchestrator <message> [--user <id>] [--session <id>]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut user_id = "local-user".to_string();
    let mut session_id = "local-session".to_string();
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--user" => user_id = args.next().ok_or(USAGE)?,
            "--session" => session_id = args.next().ok_or(USAGE)?,
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }
    let message = words.join(" ");

    let config = OrchestratorConfig::from_env()?;

    let api_key = config.gemini_api_key.clone().unwrap_or_else(|| {
        warn!("GEMINI_API_KEY not set; model calls will fail and replies fall back to canned text");
        String::new()
    });
    let llm = Arc::new(GeminiClient::new(api_key, &config.gemini_model));

    let documents: Arc<dyn DocumentService> = match &config.document_service_url {
        Some(url) => Arc::new(HttpDocumentService::new(url, config.call_timeout)),
        None => Arc::new(InMemoryDocumentService::new()),
    };
    let charts: Arc<dyn ChartStore> = match &config.chart_dir {
        Some(dir) => Arc::new(FsChartStore::new(dir.clone())),
        None => Arc::new(InMemoryChartStore::new()),
    };
    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => Arc::new(PostgresSessionStore::connect_lazy(url)?),
        None => Arc::new(InMemorySessionStore::new()),
    };

    let services = ToolServices {
        documents,
        web: Arc::new(HttpWebFetcher::new(config.call_timeout)),
        charts,
        llm,
    };

    info!(user_id = %user_id, session_id = %session_id, "Financial chat orchestrator starting");
    let orchestrator = Orchestrator::new(config, store, services);

    let reply = orchestrator
        .handle_message(&session_id, &user_id, &message)
        .await?;

    println!("{}", reply.text);
    for chart in &reply.chart_refs {
        println!("[chart] {} ({})", chart.filename, chart.chart_id);
    }
    if let Some(tool) = reply.answered_by {
        info!(
            tool = %tool,
            attempts = reply.invocation.attempts.len(),
            language = %reply.language,
            "Reply delivered"
        );
    }
    Ok(())
}
