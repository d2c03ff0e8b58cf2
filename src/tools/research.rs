use crate::error::ResearchFailure;
use crate::models::{
    FetchStatus, ResearchReport, SearchHits, SearchQuery, SearchResult, Source,
    SourceOrigin,
};
use crate::output::{slugify, timestamp_stem, write_new, OutputLayout};
use crate::tools::llm::{truncate_chars, Summarizer};
use crate::tools::scrape::{FetchChain, PageFetcher};
use crate::tools::serper::SearchProvider;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub max_sources: usize,
    pub content_budget: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_sources: 5,
            content_budget: 24_000,
        }
    }
}

/// search -> fetch (fallback chain) -> summarize -> persist.
pub struct ResearchTool {
    search: Arc<dyn SearchProvider>,
    fetchers: FetchChain,
    summarizer: Arc<dyn Summarizer>,
    output: OutputLayout,
    settings: ResearchSettings,
}

/// A source that made it into the summary input.
struct Material {
    result: SearchResult,
    text: String,
    origin: SourceOrigin,
}

impl ResearchTool {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetchers: Vec<Arc<dyn PageFetcher>>,
        summarizer: Arc<dyn Summarizer>,
        output: OutputLayout,
        settings: ResearchSettings,
    ) -> Self {
        let fetchers = FetchChain::new(fetchers);
        debug!(chain = ?fetchers.names(), "page fetchers");
        Self {
            search,
            fetchers,
            summarizer,
            output,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn research(&self, query: &str) -> Result<ResearchReport, ResearchFailure> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResearchFailure::EmptyQuery);
        }

        let hits = self.search_step(query).await;
        let materials = self.fetch_step(&hits.results).await;

        if materials.is_empty() {
            return Err(ResearchFailure::NoContent {
                query: query.to_string(),
                reason: if hits.results.is_empty() {
                    "search returned nothing".to_string()
                } else {
                    "no result had usable content".to_string()
                },
            });
        }

        let corpus = self.build_corpus(&materials);
        let summary = match self.summarizer.summarize(query, &corpus).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => {
                warn!("summarizer returned empty text, using extracts");
                extractive_summary(&materials)
            }
            Err(e) => {
                warn!("summarization failed, using extracts: {}", e);
                extractive_summary(&materials)
            }
        };

        let sources: Vec<Source> = materials
            .into_iter()
            .map(|m| Source {
                title: m.result.title,
                url: m.result.url,
                origin: m.origin,
            })
            .collect();

        let mut report = ResearchReport {
            query: query.to_string(),
            summary,
            sources,
            related_queries: hits.related_queries,
            created_at: Utc::now(),
            path: PathBuf::new(),
        };
        let stem = format!("{}_{}", timestamp_stem(report.created_at), slugify(query, 60));
        let markdown = report.to_markdown();
        report.path = write_new(&self.output.research_dir(), &stem, "md", markdown.as_bytes())
            .await
            .map_err(ResearchFailure::Persist)?;
        info!(
            path = %report.path.display(),
            sources = report.sources.len(),
            "research report saved"
        );

        Ok(report)
    }

    /// One search attempt. Any failure degrades to an empty result set.
    async fn search_step(&self, query: &str) -> SearchHits {
        let request = SearchQuery {
            text: query.to_string(),
            limit: Some(self.settings.max_sources.max(1).saturating_mul(2)),
        };
        match self.search.search(&request).await {
            Ok(mut hits) => {
                hits.results.truncate(self.settings.max_sources);
                info!("search returned {} usable results", hits.results.len());
                hits
            }
            Err(e) => {
                warn!("search failed, continuing without results: {}", e);
                SearchHits::default()
            }
        }
    }

    /// Fetched pages when any succeed, otherwise the search snippets.
    async fn fetch_step(&self, results: &[SearchResult]) -> Vec<Material> {
        let mut fetched = Vec::new();
        for result in results {
            let content = self.fetchers.fetch(&result.url).await;
            if let FetchStatus::Fetched { via } = content.status {
                fetched.push(Material {
                    result: result.clone(),
                    text: content.text,
                    origin: SourceOrigin::Fetched { via },
                });
            }
        }
        info!("fetched {} of {} pages", fetched.len(), results.len());
        if !fetched.is_empty() {
            return fetched;
        }

        results
            .iter()
            .filter(|r| !r.snippet.trim().is_empty() || !r.title.trim().is_empty())
            .map(|r| Material {
                result: r.clone(),
                text: r.snippet.clone(),
                origin: SourceOrigin::Snippet,
            })
            .collect()
    }

    fn build_corpus(&self, materials: &[Material]) -> String {
        let share = (self.settings.content_budget / materials.len().max(1)).max(1);
        let mut corpus = String::new();
        for m in materials {
            corpus.push_str(&format!(
                "Source: {} ({})\n{}\n\n",
                m.result.title,
                m.result.url,
                truncate_chars(m.text.trim(), share)
            ));
        }
        truncate_chars(&corpus, self.settings.content_budget).to_string()
    }
}

fn extractive_summary(materials: &[Material]) -> String {
    materials
        .iter()
        .map(|m| {
            let lead = truncate_chars(m.text.trim(), 400);
            if lead.is_empty() {
                format!("- {} ({})", m.result.title, m.result.url)
            } else {
                format!("- {} ({}): {}", m.result.title, m.result.url, lead)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::tools::scrape::testing::StubFetcher;
    use crate::tools::serper::testing::StubSearch;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Echoes the source lines it was given so tests can see what reached it.
    #[derive(Default)]
    struct EchoSummarizer {
        inputs: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(&self, query: &str, content: &str) -> Result<String, ProviderError> {
            self.inputs.lock().unwrap().push(content.to_string());
            if self.fail {
                return Err(ProviderError::Timeout(std::time::Duration::from_secs(1)));
            }
            let cited: Vec<&str> = content
                .lines()
                .filter(|l| l.starts_with("Source: "))
                .collect();
            Ok(format!("Findings on {query} from {}", cited.join("; ")))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: OutputLayout,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path().join("output"));
        Fixture { _dir: dir, layout }
    }

    fn tool(
        fx: &Fixture,
        search: StubSearch,
        fetchers: Vec<Arc<dyn PageFetcher>>,
        summarizer: Arc<EchoSummarizer>,
    ) -> ResearchTool {
        ResearchTool::new(
            Arc::new(search),
            fetchers,
            summarizer,
            fx.layout.clone(),
            ResearchSettings::default(),
        )
    }

    fn research_files(fx: &Fixture) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(fx.layout.research_dir()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => vec![],
        }
    }

    #[tokio::test]
    async fn e_bike_report_cites_exactly_the_fetched_pages() {
        let fx = fixture();
        let search = StubSearch(Ok(vec![
            ("Market report", "https://a.example/market"),
            ("Paywalled", "https://b.example/paywall"),
            ("Trends 2026", "https://c.example/trends"),
        ]));
        let fetcher = Arc::new(StubFetcher::new(
            "direct",
            &[
                ("https://a.example/market", "E-bike sales grew 20%."),
                ("https://c.example/trends", "Cargo e-bikes are the fastest growing segment."),
            ],
        ));
        let summarizer = Arc::new(EchoSummarizer::default());
        let tool = tool(&fx, search, vec![fetcher], summarizer.clone());

        let report = tool.research("electric bike market trends").await.unwrap();

        let urls: Vec<&str> = report.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/market", "https://c.example/trends"]);
        assert!(report.summary.contains("https://a.example/market"));
        assert!(report.summary.contains("https://c.example/trends"));
        assert!(!report.summary.contains("paywall"));
        assert_eq!(report.related_queries, vec!["related topic".to_string()]);

        let input = &summarizer.inputs.lock().unwrap()[0];
        assert!(input.contains("E-bike sales grew 20%."));
        assert!(input.contains("Cargo e-bikes"));

        assert!(report.path.exists());
        let saved = std::fs::read_to_string(&report.path).unwrap();
        assert_eq!(saved, report.to_markdown());
        assert!(report
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_electric_bike_market_trends.md"));
    }

    #[tokio::test]
    async fn secondary_fetcher_covers_primary_failure() {
        let fx = fixture();
        let search = StubSearch(Ok(vec![("Blocked", "https://a.example/blocked")]));
        let primary = Arc::new(StubFetcher::new("browserless", &[]));
        let secondary = Arc::new(StubFetcher::new(
            "direct",
            &[("https://a.example/blocked", "Recovered page body")],
        ));
        let summarizer = Arc::new(EchoSummarizer::default());
        let tool = tool(&fx, search, vec![primary.clone(), secondary], summarizer.clone());

        let report = tool.research("blocked page").await.unwrap();

        assert_eq!(primary.calls(), vec!["https://a.example/blocked".to_string()]);
        assert_eq!(
            report.sources[0].origin,
            SourceOrigin::Fetched {
                via: "direct".to_string()
            }
        );
        assert!(summarizer.inputs.lock().unwrap()[0].contains("Recovered page body"));
    }

    #[tokio::test]
    async fn total_failure_writes_nothing() {
        let fx = fixture();
        let fetcher = Arc::new(StubFetcher::new("direct", &[]));
        let summarizer = Arc::new(EchoSummarizer::default());
        let tool = tool(&fx, StubSearch(Err(())), vec![fetcher.clone()], summarizer.clone());

        let err = tool.research("anything").await.unwrap_err();

        assert!(matches!(err, ResearchFailure::NoContent { .. }));
        assert!(fetcher.calls().is_empty());
        assert!(summarizer.inputs.lock().unwrap().is_empty());
        assert!(research_files(&fx).is_empty());
    }

    #[tokio::test]
    async fn unfetchable_results_fall_back_to_snippets() {
        let fx = fixture();
        let search = StubSearch(Ok(vec![("Only snippet", "https://a.example/x")]));
        let fetcher = Arc::new(StubFetcher::new("direct", &[]));
        let summarizer = Arc::new(EchoSummarizer::default());
        let tool = tool(&fx, search, vec![fetcher], summarizer.clone());

        let report = tool.research("snippets").await.unwrap();
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].origin, SourceOrigin::Snippet);
        assert!(summarizer.inputs.lock().unwrap()[0].contains("snippet for Only snippet"));
    }

    #[tokio::test]
    async fn summarizer_failure_still_yields_a_summary() {
        let fx = fixture();
        let search = StubSearch(Ok(vec![("Page", "https://a.example/p")]));
        let fetcher = Arc::new(StubFetcher::new("direct", &[("https://a.example/p", "Body text")]));
        let summarizer = Arc::new(EchoSummarizer {
            fail: true,
            ..Default::default()
        });
        let tool = tool(&fx, search, vec![fetcher], summarizer);

        let report = tool.research("fallback summary").await.unwrap();
        assert_eq!(report.summary, "- Page (https://a.example/p): Body text");
        assert_eq!(report.sources.len(), 1);
    }

    #[tokio::test]
    async fn repeated_query_creates_a_new_file_each_time() {
        let fx = fixture();
        let pages = [("https://a.example/p", "Stable body")];
        let summarizer = Arc::new(EchoSummarizer::default());
        let tool = tool(
            &fx,
            StubSearch(Ok(vec![("Page", "https://a.example/p")])),
            vec![Arc::new(StubFetcher::new("direct", &pages))],
            summarizer,
        );

        let first = tool.research("same query").await.unwrap();
        let second = tool.research("same query").await.unwrap();

        assert_eq!(first.summary, second.summary);
        assert_ne!(first.path, second.path);
        assert_eq!(research_files(&fx).len(), 2);
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let fx = fixture();
        let tool = tool(
            &fx,
            StubSearch(Ok(vec![])),
            vec![],
            Arc::new(EchoSummarizer::default()),
        );
        assert!(matches!(
            tool.research("   ").await.unwrap_err(),
            ResearchFailure::EmptyQuery
        ));
    }

    /// Seven results; remembers the requested limit.
    #[derive(Default)]
    struct WideSearch {
        limits: Mutex<Vec<Option<usize>>>,
    }

    #[async_trait]
    impl SearchProvider for WideSearch {
        async fn search(&self, query: &SearchQuery) -> Result<SearchHits, ProviderError> {
            self.limits.lock().unwrap().push(query.limit);
            Ok(SearchHits {
                results: (1..=7)
                    .map(|i| SearchResult {
                        title: format!("Result {i}"),
                        url: format!("https://r{i}.example/"),
                        snippet: format!("snippet {i}"),
                    })
                    .collect(),
                related_queries: vec![],
            })
        }
    }

    fn wide_pages() -> Vec<(String, String)> {
        (1..=7)
            .map(|i| (format!("https://r{i}.example/"), format!("page {i}")))
            .collect()
    }

    #[tokio::test]
    async fn only_top_results_are_fetched() {
        let fx = fixture();
        let search = Arc::new(WideSearch::default());
        let pages = wide_pages();
        let pages: Vec<(&str, &str)> = pages
            .iter()
            .map(|(u, t)| (u.as_str(), t.as_str()))
            .collect();
        let fetcher = Arc::new(StubFetcher::new("direct", &pages));
        let tool = ResearchTool::new(
            search.clone(),
            vec![fetcher.clone()],
            Arc::new(EchoSummarizer::default()),
            fx.layout.clone(),
            ResearchSettings {
                max_sources: 2,
                content_budget: 24_000,
            },
        );

        let report = tool.research("cargo bikes").await.unwrap();

        assert_eq!(*search.limits.lock().unwrap(), vec![Some(4)]);
        assert_eq!(
            fetcher.calls(),
            vec!["https://r1.example/".to_string(), "https://r2.example/".to_string()]
        );
        assert_eq!(report.sources.len(), 2);
    }

    #[tokio::test]
    async fn huge_source_limit_does_not_overflow() {
        let fx = fixture();
        let search = Arc::new(WideSearch::default());
        let tool = ResearchTool::new(
            search.clone(),
            vec![],
            Arc::new(EchoSummarizer::default()),
            fx.layout.clone(),
            ResearchSettings {
                max_sources: usize::MAX,
                content_budget: 24_000,
            },
        );

        let report = tool.research("cargo bikes").await.unwrap();

        assert_eq!(*search.limits.lock().unwrap(), vec![Some(usize::MAX)]);
        assert_eq!(report.sources.len(), 7);
    }

    #[test]
    fn corpus_respects_budget() {
        let fx = fixture();
        let tool = ResearchTool::new(
            Arc::new(StubSearch(Ok(vec![]))),
            vec![],
            Arc::new(EchoSummarizer::default()),
            fx.layout.clone(),
            ResearchSettings {
                max_sources: 2,
                content_budget: 100,
            },
        );
        let materials = vec![
            Material {
                result: SearchResult {
                    title: "A".to_string(),
                    url: "https://a".to_string(),
                    snippet: String::new(),
                },
                text: "x".repeat(500),
                origin: SourceOrigin::Snippet,
            },
            Material {
                result: SearchResult {
                    title: "B".to_string(),
                    url: "https://b".to_string(),
                    snippet: String::new(),
                },
                text: "y".repeat(500),
                origin: SourceOrigin::Snippet,
            },
        ];
        let corpus = tool.build_corpus(&materials);
        assert!(corpus.chars().count() <= 100);
        assert!(corpus.contains("Source: A (https://a)"));
        assert!(corpus.contains("Source: B (https://b)"));
    }
}
