use std::collections::HashMap;

use serde_json::json;

use alabobai_types::{Capability, Domain, Method};

/// Read-only registry of capability definitions, validated once at
/// startup and shared across all concurrent operations.
#[derive(Debug)]
pub struct CapabilityCatalog {
    entries: Vec<Capability>,
    by_id: HashMap<String, usize>,
}

impl CapabilityCatalog {
    pub fn new(entries: Vec<Capability>) -> anyhow::Result<Self> {
        let mut by_id = HashMap::new();
        for (index, capability) in entries.iter().enumerate() {
            validate_entry(capability)?;
            if by_id.insert(capability.id.clone(), index).is_some() {
                anyhow::bail!("duplicate capability id `{}`", capability.id);
            }
        }
        Ok(Self { entries, by_id })
    }

    /// The built-in manifest. Every skill endpoint the runtime knows
    /// how to orchestrate is declared here.
    pub fn builtin() -> Self {
        Self::new(builtin_entries()).expect("builtin capability manifest is valid")
    }

    pub fn get(&self, id: &str) -> Option<&Capability> {
        self.by_id.get(id).map(|index| &self.entries[*index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.entries.iter()
    }

    pub fn list(&self) -> Vec<Capability> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry(capability: &Capability) -> anyhow::Result<()> {
    if !capability.id.contains('.') || capability.id.starts_with('.') || capability.id.ends_with('.')
    {
        anyhow::bail!("capability id `{}` is not a dotted identifier", capability.id);
    }
    if !capability.route.starts_with('/') {
        anyhow::bail!(
            "capability `{}` route `{}` must start with `/`",
            capability.id,
            capability.route
        );
    }
    Ok(())
}

fn entry(
    id: &str,
    name: &str,
    description: &str,
    domain: Domain,
    route: &str,
    method: Method,
    tags: &[&str],
    triggers: &[&str],
) -> Capability {
    Capability {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        domain,
        route: route.to_string(),
        method,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        triggers: triggers.iter().map(|t| t.to_string()).collect(),
        default_payload: None,
        output_hint: None,
    }
}

fn builtin_entries() -> Vec<Capability> {
    let mut entries = vec![
        entry(
            "chat.general",
            "General chat",
            "Open-ended conversation, questions and explanations",
            Domain::Chat,
            "/api/chat",
            Method::Post,
            &["chat", "conversation", "assistant"],
            &["talk to me", "ask a question"],
        ),
        entry(
            "company.plan",
            "Company planner",
            "Draft a business plan with departments, milestones and costs",
            Domain::Company,
            "/api/company/plan",
            Method::Post,
            &["business plan", "company strategy", "roadmap"],
            &["business plan", "plan my company", "company roadmap"],
        ),
        entry(
            "company.create",
            "Company builder",
            "Create a new company profile and bootstrap its structure",
            Domain::Company,
            "/api/company/create",
            Method::Post,
            &["company", "startup"],
            &["create a company", "start a company", "new company"],
        ),
        entry(
            "research.search",
            "Web research",
            "Search the web and summarize findings for a topic",
            Domain::Research,
            "/api/research/search",
            Method::Post,
            &["web search", "research"],
            &["search the web", "research this", "find information"],
        ),
        entry(
            "research.fetch-page",
            "Page fetcher",
            "Fetch a web page and return its readable content",
            Domain::Research,
            "/api/research/fetch-page",
            Method::Post,
            &["web page", "fetch"],
            &["fetch this page", "open this url", "read this website"],
        ),
        entry(
            "proxy.search",
            "Proxy search",
            "Search through the outbound proxy when direct research is unavailable",
            Domain::Proxy,
            "/api/proxy/search",
            Method::Post,
            &["proxy search"],
            &["search via proxy"],
        ),
        entry(
            "proxy.fetch",
            "Proxy fetcher",
            "Fetch a url through the outbound proxy",
            Domain::Proxy,
            "/api/proxy/fetch",
            Method::Post,
            &["proxy fetch", "url"],
            &["fetch this url"],
        ),
        entry(
            "proxy.extract",
            "Proxy extractor",
            "Extract structured content from a url through the proxy",
            Domain::Proxy,
            "/api/proxy/extract",
            Method::Post,
            &["extract", "scrape"],
            &["extract content from", "scrape this page"],
        ),
        entry(
            "media.image.generate",
            "Image generation",
            "Generate an image, logo or illustration from a prompt",
            Domain::Media,
            "/api/media/image",
            Method::Post,
            &["image", "logo", "illustration"],
            &["generate an image", "draw", "design a logo", "make a picture"],
        ),
        entry(
            "media.video.generate",
            "Video generation",
            "Generate a short video clip from a prompt",
            Domain::Media,
            "/api/media/video",
            Method::Post,
            &["video", "clip", "animation"],
            &["generate a video", "make a video", "animate"],
        ),
        entry(
            "localai.models",
            "Local model listing",
            "List the models available on the local inference host",
            Domain::LocalAi,
            "/api/local-ai/models",
            Method::Get,
            &["local models"],
            &["list local models", "which models"],
        ),
        entry(
            "localai.stats",
            "Local host statistics",
            "Report usage statistics from the local inference host",
            Domain::LocalAi,
            "/api/local-ai/stats",
            Method::Get,
            &["local stats", "statistics"],
            &["local ai stats", "show statistics"],
        ),
        entry(
            "kb.ingest",
            "Knowledge ingestion",
            "Ingest a document into the local knowledge base index",
            Domain::LocalAi,
            "/api/kb/ingest",
            Method::Post,
            &["knowledge base", "ingest"],
            &["ingest this document", "index into knowledge base", "store knowledge"],
        ),
        entry(
            "webhook.dispatch",
            "Webhook dispatch",
            "Dispatch an event payload to a configured integration webhook",
            Domain::Webhook,
            "/api/webhook/dispatch",
            Method::Post,
            &["webhook", "integration"],
            &["dispatch a webhook", "send integration event"],
        ),
    ];

    for capability in entries.iter_mut() {
        match capability.id.as_str() {
            "research.search" | "proxy.search" => {
                capability.default_payload = Some(json!({ "limit": 5 }));
                capability.output_hint = Some("results[] with summaries".to_string());
            }
            "company.plan" | "company.create" => {
                capability.default_payload =
                    Some(json!({ "name": "New Venture", "companyType": "startup" }));
                capability.output_hint = Some("plan with narrative or structure".to_string());
            }
            "media.image.generate" => {
                capability.output_hint = Some("url or data:image payload".to_string());
            }
            "media.video.generate" => {
                capability.output_hint = Some("videoUrl payload".to_string());
            }
            "chat.general" => {
                capability.output_hint = Some("content string".to_string());
            }
            _ => {}
        }
    }

    entries
}
