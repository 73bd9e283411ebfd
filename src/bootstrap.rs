//! Wiring of shared resources from configuration
//!
//! Everything built here is created once per process and shared read-only
//! by all runs.

use crate::agent::Orchestrator;
use crate::classifier::StrategyClassifier;
use crate::config::AppConfig;
use crate::gemini::{GeminiClient, TextGenerator};
use crate::indicators::IndicatorEngine;
use crate::knowledge::{
    default_corpus, load_news, Embedder, GeminiEmbedder, HashingEmbedder, KnowledgeStore,
    SimilarityMetric,
};
use crate::market::{
    AlphaVantageSource, CoinGeckoSource, InMemoryMarketData, MarketDataSource, RoutedMarketData,
};
use crate::planner::{GeminiPlanner, HeuristicPlanner, Planner};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub fn market_source(config: &AppConfig) -> Result<Arc<dyn MarketDataSource>> {
    if let Some(path) = &config.market_data_file {
        info!(path = %path.display(), "Using file-backed market data");
        return Ok(Arc::new(InMemoryMarketData::load_json(path)?));
    }

    let timeout = config.orchestrator.fetch_timeout;
    let crypto = Arc::new(CoinGeckoSource::new(config.coingecko_url.clone(), timeout)?);
    let equities = Arc::new(AlphaVantageSource::new(
        config.alpha_vantage_api_key.clone().unwrap_or_default(),
        config.alpha_vantage_url.clone(),
        timeout,
    )?);

    if config.alpha_vantage_api_key.is_none() {
        warn!("ALPHA_VANTAGE_API_KEY not set; only crypto symbols can be fetched");
    }

    Ok(Arc::new(RoutedMarketData::new(crypto, equities)))
}

pub fn text_generator(config: &AppConfig) -> Result<Arc<dyn TextGenerator>> {
    let key = config.gemini_api_key.clone().unwrap_or_default();
    let client = match &config.gemini_model {
        Some(model) => GeminiClient::with_model(key, model)?,
        None => GeminiClient::new(key)?,
    };

    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set; synthesis will use the templated summary");
    }

    Ok(Arc::new(client))
}

pub fn planner(config: &AppConfig, generator: Arc<dyn TextGenerator>) -> Box<dyn Planner> {
    if config.gemini_api_key.is_some() {
        Box::new(GeminiPlanner::new(generator))
    } else {
        Box::new(HeuristicPlanner)
    }
}

pub fn embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    match &config.gemini_api_key {
        Some(key) => Ok(Arc::new(GeminiEmbedder::new(key.clone())?)),
        None => {
            info!(
                dimension = config.embedding_dimension,
                "No embedding service configured; using local hashing embedder"
            );
            Ok(Arc::new(HashingEmbedder::new(config.embedding_dimension)))
        }
    }
}

/// Load the persisted index, or build one from the seed corpus and news file.
/// An index built with a different embedder is rebuilt and overwritten.
/// A store that cannot be built leaves the capability unavailable.
pub async fn knowledge_store(
    config: &AppConfig,
    embedder: Arc<dyn Embedder>,
) -> Option<Arc<KnowledgeStore>> {
    let timeout = config.orchestrator.knowledge_timeout;
    let mut stale = false;

    if let Some(path) = &config.knowledge_index_path {
        if path.exists() {
            match KnowledgeStore::load_index(path, embedder.clone()) {
                Ok(store) => {
                    let store = store.with_embed_timeout(timeout);
                    let mismatch = store.embedder_mismatch().await;
                    match mismatch {
                        Ok(None) => return Some(Arc::new(store)),
                        Ok(Some(reason)) => {
                            warn!(
                                path = %path.display(),
                                %reason,
                                "Knowledge index does not match the embedder; rebuilding"
                            );
                            stale = true;
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                "Could not verify the knowledge index against the embedder"
                            );
                            return Some(Arc::new(store));
                        }
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to load knowledge index"),
            }
        }
    }

    let mut corpus = default_corpus();
    if let Some(path) = &config.knowledge_news_file {
        match load_news(path) {
            Ok(news) => {
                info!(
                    path = %path.display(),
                    items = news.len(),
                    "News loaded into the knowledge corpus"
                );
                corpus.extend(news);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load news file"),
        }
    }

    let store = match KnowledgeStore::build(&corpus, embedder, SimilarityMetric::Cosine).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Knowledge store unavailable");
            return None;
        }
    };

    if let Some(path) = &config.knowledge_index_path {
        if stale || !path.exists() {
            match store.save_index(path) {
                Ok(()) => info!(path = %path.display(), "Knowledge index saved"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to save knowledge index"),
            }
        }
    }

    Some(Arc::new(store.with_embed_timeout(timeout)))
}

pub fn classifier(config: &AppConfig) -> Option<Arc<StrategyClassifier>> {
    match StrategyClassifier::load(&config.model_path) {
        Ok(classifier) => Some(Arc::new(classifier)),
        Err(e) => {
            warn!(
                path = %config.model_path.display(),
                error = %e,
                "Strategy classifier unavailable; classifier calls will be skipped"
            );
            None
        }
    }
}

/// Build a ready orchestrator from configuration
pub async fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let market = market_source(config)?;
    let generator = text_generator(config)?;
    let planner = planner(config, generator.clone());
    let knowledge = knowledge_store(config, embedder(config)?).await;
    let classifier = classifier(config);

    info!(
        knowledge = knowledge.is_some(),
        classifier = classifier.is_some(),
        "Orchestrator initialized"
    );

    Ok(Orchestrator::new(
        market,
        planner,
        IndicatorEngine::default(),
        knowledge,
        classifier,
        generator,
        config.orchestrator.clone(),
    ))
}
