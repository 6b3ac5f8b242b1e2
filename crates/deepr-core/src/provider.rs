// Provider port
//
// Provider-agnostic contract for deep-research backends. Concrete SDK
// adapters implement this trait out of tree; the engine only depends on
// the port plus the static capability table below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use deepr_contracts::{Citation, JobError, ProviderKind, TokenUsage, ToolSpec};

use crate::error::{DeeprError, Result};

/// Request handed to a provider's `submit`
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub job_id: Uuid,
    pub prompt: String,
    pub model: String,
    pub tools: Vec<ToolSpec>,
    pub vector_store_ref: Option<String>,
}

/// Remote job status as reported by a provider poll
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    Running { progress: Option<f64> },
    Completed,
    Failed { error: JobError },
    /// Provider no longer recognises the id
    Unknown,
}

/// One entry of a batched poll response
#[derive(Debug, Clone)]
pub struct RemotePoll {
    pub provider_job_id: String,
    pub status: RemoteStatus,
}

/// Final artifact fetched from a provider
#[derive(Debug, Clone)]
pub struct ResearchResult {
    pub markdown: String,
    pub citations: Vec<Citation>,
    pub token_usage: TokenUsage,
    pub cost: f64,
}

/// Trait for deep-research providers
///
/// All operations may fail with rate-limit, auth, invalid-request,
/// provider-5xx or network errors; the caller decides what is retryable.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Submit a research request, returning the provider's job id
    async fn submit(&self, request: &ResearchRequest) -> Result<String>;

    /// Poll a batch of provider job ids
    ///
    /// Implementations must accept batches; a single-id fallback loop is a
    /// legal implementation.
    async fn poll(&self, provider_job_ids: &[String]) -> Result<Vec<RemotePoll>>;

    /// Fetch the final artifact for a completed job
    async fn fetch_result(&self, provider_job_id: &str) -> Result<ResearchResult>;

    /// Best-effort cancellation
    async fn cancel(&self, provider_job_id: &str) -> Result<()>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("kind", &self.kind()).finish()
    }
}

/// Which tools a provider supports natively
///
/// `FileSearch` on a provider without native support is not an admission
/// error: the engine materialises it by pre-retrieving from the document
/// store and injecting excerpts into the prompt.
pub fn supports_tool(provider: ProviderKind, tool: &ToolSpec) -> bool {
    use ProviderKind::*;
    match tool {
        ToolSpec::WebSearch => true,
        ToolSpec::FileSearch { .. } => matches!(provider, OpenAi | Azure),
        ToolSpec::CodeInterpreter => matches!(provider, OpenAi | Azure | Gemini | Anthropic),
        ToolSpec::Mcp { .. } => matches!(provider, OpenAi | Anthropic),
    }
}

/// Tools the provider cannot run natively
pub fn unsupported_tools<'a>(provider: ProviderKind, tools: &'a [ToolSpec]) -> Vec<&'a ToolSpec> {
    tools
        .iter()
        .filter(|tool| !supports_tool(provider, tool))
        .collect()
}

/// Registry of configured provider backends
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| DeeprError::UnknownProvider(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_search_is_universal() {
        for provider in ProviderKind::all() {
            assert!(supports_tool(*provider, &ToolSpec::WebSearch));
        }
    }

    #[test]
    fn grok_supports_nothing_but_web_search() {
        let tools = vec![
            ToolSpec::WebSearch,
            ToolSpec::CodeInterpreter,
            ToolSpec::Mcp {
                server_url: "http://localhost:1234".into(),
            },
        ];
        let unsupported = unsupported_tools(ProviderKind::Grok, &tools);
        assert_eq!(unsupported.len(), 2);
    }

    #[test]
    fn file_search_native_only_on_openai_family() {
        let tool = ToolSpec::FileSearch {
            store_ref: "vs_1".into(),
        };
        assert!(supports_tool(ProviderKind::OpenAi, &tool));
        assert!(supports_tool(ProviderKind::Azure, &tool));
        assert!(!supports_tool(ProviderKind::Gemini, &tool));
        assert!(!supports_tool(ProviderKind::Anthropic, &tool));
    }

    #[test]
    fn registry_reports_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.get(ProviderKind::Gemini).unwrap_err();
        assert!(matches!(err, DeeprError::UnknownProvider(_)));
    }
}
