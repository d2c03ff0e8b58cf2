use crate::error::{ProviderError, VisualFailure};
use crate::models::{
    CritiqueStatus, GeneratedImage, ImageArtifact, ImageCritique, ImageRequest, ProviderMetadata,
    StyleParams,
};
use crate::output::{write_new, OutputLayout};
use crate::tools::replicate::{ImageCritic, ImageGenerator};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const CRITIQUE_TEMPLATE: &str = "Analyze this image and rate how well it matches this prompt: '{prompt}'. Rate from 1-10 and explain how to improve it. List each suggested improvement on its own line starting with '-'.";

#[derive(Debug, Clone)]
pub struct VisualSettings {
    pub generation_timeout: Duration,
    pub critique_timeout: Duration,
    /// Extra time past each provider deadline, so the provider can cancel
    /// its own work before the call is abandoned.
    pub cancel_grace: Duration,
    pub style: StyleParams,
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(300),
            critique_timeout: Duration::from_secs(120),
            cancel_grace: Duration::from_secs(10),
            style: StyleParams::default(),
        }
    }
}

/// generate -> persist -> critique. Critique problems never fail the call.
pub struct VisualTool {
    generator: Arc<dyn ImageGenerator>,
    critic: Arc<dyn ImageCritic>,
    output: OutputLayout,
    session_id: String,
    sequence: AtomicU32,
    settings: VisualSettings,
}

impl VisualTool {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        critic: Arc<dyn ImageCritic>,
        output: OutputLayout,
        session_id: &str,
        settings: VisualSettings,
    ) -> Self {
        Self {
            generator,
            critic,
            output,
            session_id: session_id.to_string(),
            sequence: AtomicU32::new(0),
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn generate_and_critique(
        &self,
        brief: &str,
    ) -> Result<(GeneratedImage, ImageCritique), VisualFailure> {
        let brief = brief.trim();
        if brief.is_empty() {
            return Err(VisualFailure::EmptyBrief);
        }
        let request = ImageRequest {
            brief: brief.to_string(),
            style: self.settings.style.clone(),
        };
        let prompt = request.prompt();

        let limit = self.settings.generation_timeout;
        let hard_limit = limit.saturating_add(self.settings.cancel_grace);
        let artifact = tokio::time::timeout(hard_limit, self.generator.generate(&request))
            .await
            .map_err(|_| VisualFailure::Timeout(limit))?
            .map_err(|e| match e {
                ProviderError::Timeout(_) => VisualFailure::Timeout(limit),
                other => VisualFailure::Provider(other),
            })?;

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let stem = format!("{}_{:03}", self.session_id, seq);
        let path = write_new(&self.output.images_dir(), &stem, &artifact.extension, &artifact.bytes)
            .await
            .map_err(VisualFailure::Persist)?;
        info!(path = %path.display(), "image saved");

        let image = GeneratedImage {
            path,
            prompt,
            metadata: artifact.metadata.clone(),
            created_at: Utc::now(),
        };
        let critique = self.review(&image, &artifact).await;
        Ok((image, critique))
    }

    /// Critiques an image this session already saved under `images/`.
    #[instrument(skip(self))]
    pub async fn critique_image(
        &self,
        image_path: &Path,
        original_prompt: &str,
    ) -> Result<ImageCritique, VisualFailure> {
        let unreadable = |source| VisualFailure::Unreadable {
            path: image_path.to_path_buf(),
            source,
        };
        let resolved = tokio::fs::canonicalize(image_path).await.map_err(unreadable)?;
        let images_dir = tokio::fs::canonicalize(self.output.images_dir())
            .await
            .map_err(|_| VisualFailure::ForeignImage(image_path.to_path_buf()))?;
        if !resolved.starts_with(&images_dir) {
            return Err(VisualFailure::ForeignImage(image_path.to_path_buf()));
        }

        let bytes = tokio::fs::read(&resolved).await.map_err(unreadable)?;
        if bytes.is_empty() {
            return Err(unreadable(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "image file is empty",
            )));
        }
        let extension = resolved
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let artifact = ImageArtifact {
            bytes,
            extension,
            metadata: ProviderMetadata {
                provider: "local".to_string(),
                model: "saved image".to_string(),
                prediction_id: None,
                source_url: None,
            },
        };
        let image = GeneratedImage {
            path: image_path.to_path_buf(),
            prompt: original_prompt.trim().to_string(),
            metadata: artifact.metadata.clone(),
            created_at: Utc::now(),
        };
        Ok(self.review(&image, &artifact).await)
    }

    async fn review(&self, image: &GeneratedImage, artifact: &ImageArtifact) -> ImageCritique {
        let path = image.path.clone();
        let instruction = CRITIQUE_TEMPLATE.replace("{prompt}", &image.prompt);
        let limit = self.settings.critique_timeout;
        let hard_limit = limit.saturating_add(self.settings.cancel_grace);
        let late = || format!("critique did not finish within {limit:?}");

        let critique = match tokio::time::timeout(
            hard_limit,
            self.critic.critique(artifact, &instruction),
        )
        .await
        {
            Ok(Ok(text)) if !text.trim().is_empty() => parse_critique(path, text.trim()),
            Ok(Ok(_)) => ImageCritique::degraded(path, "critic returned no text"),
            Ok(Err(ProviderError::Timeout(_))) | Err(_) => {
                warn!("image critique timed out after {:?}", limit);
                ImageCritique::degraded(path, late())
            }
            Ok(Err(e)) => {
                warn!("image critique failed: {}", e);
                ImageCritique::degraded(path, e.to_string())
            }
        };

        self.save_critique(image, &critique).await;
        critique
    }

    async fn save_critique(&self, image: &GeneratedImage, critique: &ImageCritique) {
        let stem = match image.path.file_stem() {
            Some(stem) => format!("{}.critique", stem.to_string_lossy()),
            None => return,
        };
        let mut body = format!(
            "# Critique: {}\n\nPrompt: {}\n\n",
            image.path.display(),
            image.prompt
        );
        match &critique.status {
            CritiqueStatus::Complete => {
                body.push_str(&critique.text);
                body.push('\n');
                if let Some(rating) = critique.rating {
                    body.push_str(&format!("\nRating: {rating}/10\n"));
                }
                if !critique.suggested_revisions.is_empty() {
                    body.push_str("\n## Suggested revisions\n\n");
                    body.push_str(&revision_list(&critique.suggested_revisions));
                }
            }
            CritiqueStatus::Degraded { reason } => {
                body.push_str(&format!("Critique unavailable: {reason}\n"));
            }
        }
        if let Err(e) = write_new(&self.output.images_dir(), &stem, "md", body.as_bytes()).await {
            warn!("failed to save critique for {}: {}", image.path.display(), e);
        }
    }
}

/// One `- ` line per revision.
pub fn revision_list(revisions: &[String]) -> String {
    revisions.iter().map(|r| format!("- {r}\n")).collect()
}

fn parse_critique(image_path: PathBuf, text: &str) -> ImageCritique {
    ImageCritique {
        image_path,
        text: text.to_string(),
        suggested_revisions: suggested_revisions(text),
        rating: parse_rating(text),
        status: CritiqueStatus::Complete,
    }
}

/// Finds the first `N/10` with N in 1..=10.
fn parse_rating(text: &str) -> Option<u8> {
    let bytes = text.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find("/10") {
        let slash = search_from + offset;
        let digits_start = bytes[..slash]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map(|p| p + 1)
            .unwrap_or(0);
        if digits_start < slash {
            if let Ok(n) = text[digits_start..slash].parse::<u8>() {
                if (1..=10).contains(&n) {
                    return Some(n);
                }
            }
        }
        search_from = slash + 3;
    }
    None
}

fn suggested_revisions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| {
            let rest = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| {
                    let digits = line.chars().take_while(char::is_ascii_digit).count();
                    if digits == 0 {
                        return None;
                    }
                    line[digits..]
                        .strip_prefix(". ")
                        .or_else(|| line[digits..].strip_prefix(") "))
                })?;
            let rest = rest.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::replicate::testing::{StubCritic, StubGenerator};
    use crate::tools::replicate::{
        ReplicateClient, ReplicateImageCritic, ReplicateImageGenerator, LLAVA_VERSION, SDXL_VERSION,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn visual(
        dir: &tempfile::TempDir,
        generator: StubGenerator,
        critic: StubCritic,
        generation_timeout: Duration,
    ) -> (VisualTool, OutputLayout) {
        let layout = OutputLayout::new(dir.path().join("output"));
        let tool = VisualTool::new(
            Arc::new(generator),
            Arc::new(critic),
            layout.clone(),
            "sess-1",
            VisualSettings {
                generation_timeout,
                critique_timeout: Duration::from_secs(5),
                cancel_grace: Duration::from_millis(20),
                style: StyleParams::default(),
            },
        );
        (tool, layout)
    }

    fn replicate_visual(
        server: &MockServer,
        dir: &tempfile::TempDir,
        generation_timeout: Duration,
        critique_timeout: Duration,
    ) -> (VisualTool, OutputLayout) {
        let client = ReplicateClient::new(
            reqwest::Client::new(),
            "r8-token",
            &server.uri(),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        let layout = OutputLayout::new(dir.path().join("output"));
        let tool = VisualTool::new(
            Arc::new(ReplicateImageGenerator::new(client.clone(), generation_timeout)),
            Arc::new(ReplicateImageCritic::new(client, critique_timeout)),
            layout.clone(),
            "sess-1",
            VisualSettings {
                generation_timeout,
                critique_timeout,
                cancel_grace: Duration::from_secs(1),
                style: StyleParams::default(),
            },
        );
        (tool, layout)
    }

    async fn mount_stuck_prediction(server: &MockServer, id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/predictions/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id, "status": "processing"
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/predictions/{id}/cancel")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id, "status": "canceled"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn cancel_requests(server: &MockServer, id: &str) -> usize {
        let cancel_path = format!("/v1/predictions/{id}/cancel");
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == cancel_path)
            .count()
    }

    fn read_critique(layout: &OutputLayout) -> String {
        std::fs::read_to_string(layout.images_dir().join("sess-1_001.critique.md")).unwrap()
    }

    struct SlowCritic(Duration);

    #[async_trait]
    impl ImageCritic for SlowCritic {
        async fn critique(
            &self,
            _image: &ImageArtifact,
            _instruction: &str,
        ) -> Result<String, ProviderError> {
            tokio::time::sleep(self.0).await;
            Ok("Rating: 9/10".to_string())
        }
    }

    fn quick() -> StubGenerator {
        StubGenerator {
            delay: Duration::ZERO,
            fail: false,
        }
    }

    #[tokio::test]
    async fn persists_image_and_parses_critique() {
        let dir = tempfile::tempdir().unwrap();
        let critique_text =
            "Rating: 7/10\nStrong composition.\n- Warmer lighting\n2. Show the brand logo";
        let (tool, layout) =
            visual(&dir, quick(), StubCritic(Ok(critique_text)), Duration::from_secs(5));

        let (image, critique) = tool
            .generate_and_critique("A commuter riding an e-bike at dawn")
            .await
            .unwrap();

        assert!(image.path.exists());
        assert_eq!(image.path, layout.images_dir().join("sess-1_001.png"));
        assert_eq!(std::fs::read(&image.path).unwrap(), vec![137, 80, 78, 71, 1, 2, 3]);
        assert!(image.prompt.starts_with("A commuter riding an e-bike at dawn"));
        assert_eq!(critique.image_path, image.path);
        assert_eq!(critique.status, CritiqueStatus::Complete);
        assert_eq!(critique.rating, Some(7));
        assert_eq!(
            critique.suggested_revisions,
            vec!["Warmer lighting".to_string(), "Show the brand logo".to_string()]
        );
        let saved = read_critique(&layout);
        assert!(saved.contains("Strong composition."));
        assert!(saved.contains("Rating: 7/10"));
        assert!(saved.contains(
            "## Suggested revisions\n\n- Warmer lighting\n- Show the brand logo\n"
        ));
    }

    #[tokio::test]
    async fn sequence_numbers_give_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, layout) =
            visual(&dir, quick(), StubCritic(Ok("Fine, 6/10")), Duration::from_secs(5));
        let (first, _) = tool.generate_and_critique("one").await.unwrap();
        let (second, _) = tool.generate_and_critique("two").await.unwrap();
        assert_eq!(first.path, layout.images_dir().join("sess-1_001.png"));
        assert_eq!(second.path, layout.images_dir().join("sess-1_002.png"));
    }

    #[tokio::test]
    async fn critique_failure_is_degraded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, layout) = visual(&dir, quick(), StubCritic(Err(())), Duration::from_secs(5));

        let (image, critique) = tool.generate_and_critique("poster").await.unwrap();

        assert!(image.path.exists());
        assert!(critique.is_degraded());
        assert!(critique.text.is_empty());
        match &critique.status {
            CritiqueStatus::Degraded { reason } => assert!(reason.contains("vision model down")),
            other => panic!("unexpected {other:?}"),
        }
        let saved = read_critique(&layout);
        assert!(saved.contains("Critique unavailable"));
    }

    #[tokio::test]
    async fn empty_critique_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, _) = visual(&dir, quick(), StubCritic(Ok("   ")), Duration::from_secs(5));
        let (_, critique) = tool.generate_and_critique("poster").await.unwrap();
        assert!(critique.is_degraded());
    }

    #[tokio::test]
    async fn slow_generation_times_out_without_saving() {
        let dir = tempfile::tempdir().unwrap();
        let slow = StubGenerator {
            delay: Duration::from_secs(10),
            fail: false,
        };
        let (tool, layout) =
            visual(&dir, slow, StubCritic(Ok("unused")), Duration::from_millis(50));

        let err = tool.generate_and_critique("billboard").await.unwrap_err();

        assert!(matches!(err, VisualFailure::Timeout(d) if d == Duration::from_millis(50)));
        let saved = std::fs::read_dir(layout.images_dir())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(saved, 0);
    }

    #[tokio::test]
    async fn provider_error_is_a_visual_failure() {
        let dir = tempfile::tempdir().unwrap();
        let broken = StubGenerator {
            delay: Duration::ZERO,
            fail: true,
        };
        let (tool, _) = visual(&dir, broken, StubCritic(Ok("unused")), Duration::from_secs(5));
        assert!(matches!(
            tool.generate_and_critique("billboard").await.unwrap_err(),
            VisualFailure::Provider(ProviderError::Rejected(_))
        ));
        assert!(matches!(
            tool.generate_and_critique("  ").await.unwrap_err(),
            VisualFailure::EmptyBrief
        ));
    }

    #[tokio::test]
    async fn stuck_generation_is_cancelled_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "stuck", "status": "starting"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_stuck_prediction(&server, "stuck").await;

        let dir = tempfile::tempdir().unwrap();
        let limit = Duration::from_millis(200);
        let (tool, layout) = replicate_visual(&server, &dir, limit, Duration::from_secs(5));

        let err = tool.generate_and_critique("billboard").await.unwrap_err();

        assert!(matches!(err, VisualFailure::Timeout(d) if d == limit));
        assert_eq!(cancel_requests(&server, "stuck").await, 1);
        let saved = std::fs::read_dir(layout.images_dir())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(saved, 0);
    }

    #[tokio::test]
    async fn stuck_critique_is_cancelled_and_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .and(body_partial_json(json!({ "version": SDXL_VERSION })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "img",
                "status": "succeeded",
                "output": [format!("{}/files/out.png", server.uri())]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/out.png"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![137u8, 80, 78, 71], "image/png"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .and(body_partial_json(json!({ "version": LLAVA_VERSION })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "crit", "status": "starting"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_stuck_prediction(&server, "crit").await;

        let dir = tempfile::tempdir().unwrap();
        let (tool, _) =
            replicate_visual(&server, &dir, Duration::from_secs(5), Duration::from_millis(200));

        let (image, critique) = tool.generate_and_critique("billboard").await.unwrap();

        assert!(image.path.exists());
        assert!(critique.is_degraded());
        assert_eq!(cancel_requests(&server, "crit").await, 1);
        match &critique.status {
            CritiqueStatus::Degraded { reason } => assert!(reason.contains("did not finish")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_critic_is_degraded_after_its_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path().join("output"));
        let tool = VisualTool::new(
            Arc::new(quick()),
            Arc::new(SlowCritic(Duration::from_secs(10))),
            layout.clone(),
            "sess-1",
            VisualSettings {
                generation_timeout: Duration::from_secs(5),
                critique_timeout: Duration::from_millis(50),
                cancel_grace: Duration::from_millis(50),
                style: StyleParams::default(),
            },
        );

        let started = std::time::Instant::now();
        let (image, critique) = tool.generate_and_critique("poster").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(image.path.exists());
        match &critique.status {
            CritiqueStatus::Degraded { reason } => {
                assert_eq!(reason, "critique did not finish within 50ms")
            }
            other => panic!("unexpected {other:?}"),
        }
        let saved = read_critique(&layout);
        assert!(saved.contains("Critique unavailable: critique did not finish"));
    }

    #[tokio::test]
    async fn saved_image_can_be_critiqued_again() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, layout) = visual(
            &dir,
            quick(),
            StubCritic(Ok("Rating: 5/10\n- Add a helmet")),
            Duration::from_secs(5),
        );
        let (image, _) = tool.generate_and_critique("poster").await.unwrap();

        let critique = tool
            .critique_image(&image.path, "A parent on a cargo e-bike")
            .await
            .unwrap();

        assert_eq!(critique.image_path, image.path);
        assert_eq!(critique.rating, Some(5));
        assert_eq!(critique.suggested_revisions, vec!["Add a helmet".to_string()]);
        let mut critiques: Vec<String> = std::fs::read_dir(layout.images_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".md"))
            .collect();
        critiques.sort();
        assert_eq!(critiques.len(), 2);
    }

    #[tokio::test]
    async fn critique_rejects_files_outside_the_image_folder() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, layout) = visual(&dir, quick(), StubCritic(Ok("7/10")), Duration::from_secs(5));
        tool.generate_and_critique("poster").await.unwrap();
        let elsewhere = dir.path().join("secret.png");
        std::fs::write(&elsewhere, [1u8, 2, 3]).unwrap();

        assert!(matches!(
            tool.critique_image(&elsewhere, "poster").await.unwrap_err(),
            VisualFailure::ForeignImage(_)
        ));
        assert!(matches!(
            tool.critique_image(&layout.images_dir().join("missing.png"), "poster")
                .await
                .unwrap_err(),
            VisualFailure::Unreadable { .. }
        ));
    }

    #[test]
    fn rating_parser() {
        assert_eq!(parse_rating("I'd give it 8/10."), Some(8));
        assert_eq!(parse_rating("Score 10/10"), Some(10));
        assert_eq!(parse_rating("0/10 then 4/10"), Some(4));
        assert_eq!(parse_rating("no score"), None);
        assert_eq!(parse_rating("/10 alone"), None);
    }
}
