mod db;
mod event;
mod llm;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::generation::{AnalysisProcessor, GenerationProcessor};
use services::queue::{spawn_worker, QueueClass};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");
    let store: Arc<dyn services::attempts::AttemptStore> = Arc::new(pool);

    // External capabilities (non-fatal: the matching endpoints answer 503
    // and frame relay keeps working without analysis).
    let generator: Option<Arc<dyn llm::Generate>> = match llm::GenConfig::from_env() {
        Ok(config) => match llm::GenClient::new(config) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "generation client failed to build — generation disabled");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "generation not configured — generation disabled");
            None
        }
    };
    let analyzer = services::analysis::HttpFrameAnalyzer::from_env()
        .map(|a| Arc::new(a) as Arc<dyn services::analysis::AnalyzeFrames>);
    if analyzer.is_none() {
        tracing::warn!("FRAME_ANALYZER_URL not set — frame analysis disabled");
    }
    let extractor = services::ocr::HttpTextExtractor::from_env()
        .map(|e| Arc::new(e) as Arc<dyn services::ocr::ExtractText>);
    if extractor.is_none() {
        tracing::warn!("OCR_SERVICE_URL not set — material extraction disabled");
    }

    let escalation = services::escalation::EscalationCoordinator::from_env();
    let queue = services::queue::TaskQueue::from_env();
    let capabilities = state::Capabilities {
        generator: generator.clone(),
        analyzer: analyzer.clone(),
        extractor,
    };
    let state = state::AppState::new(store.clone(), escalation.clone(), queue.clone(), capabilities);

    // Queue workers. Generation and test-processing share the generation
    // processor; proctoring gets the analysis processor.
    if let Some(generator) = generator {
        let processor = Arc::new(GenerationProcessor::new(generator));
        spawn_worker(queue.clone(), QueueClass::Generation, processor.clone());
        spawn_worker(queue.clone(), QueueClass::TestProcessing, processor);
    }
    if let Some(analyzer) = analyzer {
        let processor = Arc::new(AnalysisProcessor::new(analyzer, state.presence.clone(), escalation, store));
        spawn_worker(queue, QueueClass::Proctoring, processor);
    }

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "examwatch listening");
    axum::serve(listener, app).await.expect("server failed");
}
