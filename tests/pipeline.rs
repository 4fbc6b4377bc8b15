//! Integration tests against a local mock of arXiv, the LLM endpoint, the
//! extraction service and the note host.
//!
//! Every endpoint is served by `wiremock`, so these run offline:
//!   cargo test --test pipeline

use arxiv2md::net::codec::encode_base64;
use arxiv2md::net::proxy::{ForwardProxyClient, ForwardProxyPayload};
use arxiv2md::{
    convert, fetch_pdf, insert_paper, Arxiv2MdError, ArxivEndpoints, ConversionConfig, ConversionProgressCallback,
    ExtractionServiceConfig, FetchPolicy, InsertMode, KernelHost, LlmConfig, ProxyConfig, Settings, SourceKind,
    Stage,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Fixtures ─────────────────────────────────────────────────────────────────

const ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2301.12345v2</id>
    <title>A Test
      Paper</title>
    <summary>An abstract.</summary>
    <author><name>Alice Smith</name></author>
    <author><name>Bob Jones</name></author>
    <link title="pdf" href="http://arxiv.org/pdf/2301.12345v2" rel="related" type="application/pdf"/>
  </entry>
</feed>"#;

const HTML: &str = r#"<html><head><title>A Test Paper</title></head><body>
<article class="ltx_document">
  <div class="ltx_authors"><span>Alice Smith</span>, <span>Bob Jones</span></div>
  <section><h2>Introduction</h2><p>We study things.</p></section>
  <section><h2>Method</h2><p>We do things.</p></section>
  <section class="ltx_bibliography"><h2>References</h2>
    <ul><li class="ltx_bibitem">[1] C. Author. A prior result.</li></ul>
  </section>
</article></body></html>"#;

const PDF: &[u8] = b"%PDF-1.4\n1 0 obj <<>> endobj\ntrailer <<>>\n%%EOF\n";

async fn arxiv_mock() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("id_list", "2301.12345"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ATOM))
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer) -> arxiv2md::ConversionConfigBuilder {
    ConversionConfig::builder()
        .endpoints(ArxivEndpoints::rooted_at(&server.uri()))
        .download_timeout_secs(5)
}

fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[derive(Default)]
struct StageRecorder {
    stages: Mutex<Vec<Stage>>,
    refine: Mutex<Vec<(usize, usize)>>,
    completed: Mutex<Option<SourceKind>>,
}

impl ConversionProgressCallback for StageRecorder {
    fn on_stage(&self, stage: Stage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_refine_progress(&self, done: usize, total: usize) {
        self.refine.lock().unwrap().push((done, total));
    }

    fn on_conversion_complete(&self, source: SourceKind, _markdown_len: usize) {
        *self.completed.lock().unwrap() = Some(source);
    }
}

// ── Full text ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn html_full_text_with_compression_blocks() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .expect(1)
        .mount(&server)
        .await;

    let recorder = Arc::new(StageRecorder::default());
    let config = config_for(&server)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let output = convert("arXiv:2301.12345", &config).await.unwrap();

    assert_eq!(output.source, SourceKind::Html);
    assert!(!output.refined);
    assert_eq!(output.metadata.title, "A Test Paper");
    assert_eq!(output.metadata.versioned_id, "2301.12345v2");
    assert!(
        output
            .markdown
            .starts_with("## Authors\n\n```text\nAuthors: Alice Smith, Bob Jones\n```"),
        "{}",
        output.markdown
    );
    assert!(output.markdown.contains("[1] C. Author. A prior result."));
    assert!(output.markdown.contains("## Introduction"));
    assert!(output.markdown.contains("We do things."));

    let stages = recorder.stages.lock().unwrap().clone();
    assert_eq!(stages, vec![Stage::FetchingMetadata, Stage::FetchingHtml]);
    assert_eq!(*recorder.completed.lock().unwrap(), Some(SourceKind::Html));
}

#[tokio::test]
async fn omit_references_drops_the_block() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .mount(&server)
        .await;

    let config = config_for(&server).omit_references(true).build().unwrap();
    let output = convert("2301.12345", &config).await.unwrap();
    assert!(!output.markdown.contains("A prior result"));
    assert!(!output.markdown.contains("## References"));
}

#[tokio::test]
async fn missing_html_falls_back_to_latex_archive() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let archive = tar_gz(&[
        ("figure.png", "not text"),
        (
            "paper.tex",
            r"\documentclass{article}
\begin{document}
\section{Intro}
Hello from \textbf{LaTeX}.
\end{document}",
        ),
    ]);
    Mock::given(method("GET"))
        .and(path("/src/2301.12345"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let recorder = Arc::new(StageRecorder::default());
    let config = config_for(&server)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let output = convert("2301.12345", &config).await.unwrap();

    assert_eq!(output.source, SourceKind::Latex);
    assert!(output.markdown.contains("Authors: Alice Smith, Bob Jones"));
    assert!(output.markdown.contains("## Intro"));
    assert!(output.markdown.contains("Hello from **LaTeX**."));
    assert!(recorder.stages.lock().unwrap().contains(&Stage::LatexFallback));
}

#[tokio::test]
async fn html_server_error_falls_back_to_latex_archive() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let archive = tar_gz(&[("main.tex", r"\begin{document}\section{Recovered}Still here.\end{document}")]);
    Mock::given(method("GET"))
        .and(path("/src/2301.12345"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let recorder = Arc::new(StageRecorder::default());
    let config = config_for(&server)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let output = convert("2301.12345", &config).await.unwrap();

    assert_eq!(output.source, SourceKind::Latex);
    assert!(output.markdown.contains("## Recovered"));
    assert_eq!(*recorder.completed.lock().unwrap(), Some(SourceKind::Latex));
}

#[tokio::test]
async fn later_archive_candidate_is_tried() {
    let server = arxiv_mock().await;
    let archive = tar_gz(&[("main.tex", r"\begin{document}\section{Only}Body.\end{document}")]);
    Mock::given(method("GET"))
        .and(path("/e-print/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server).build().unwrap();
    let output = convert("2301.12345", &config).await.unwrap();
    assert_eq!(output.source, SourceKind::Latex);
    assert!(output.markdown.contains("## Only"));
}

#[tokio::test]
async fn no_source_at_all_is_full_text_unavailable() {
    let server = arxiv_mock().await;

    let config = config_for(&server).build().unwrap();
    let err = convert("2301.12345", &config).await.unwrap_err();
    assert!(
        matches!(err, Arxiv2MdError::FullTextUnavailable { ref id } if id == "2301.12345v2"),
        "{err:?}"
    );
}

#[tokio::test]
async fn invalid_identifier_makes_no_request() {
    let server = MockServer::start().await;
    let config = config_for(&server).build().unwrap();

    let err = convert("definitely not a paper", &config).await.unwrap_err();
    assert!(matches!(err, Arxiv2MdError::InvalidIdentifier { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_paper_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
                 <id>http://arxiv.org/api/errors#incorrect_id_format_for_9999.99999</id>
                 <title>Error</title></entry></feed>"#,
        ))
        .mount(&server)
        .await;

    let config = config_for(&server).build().unwrap();
    let err = convert("9999.99999", &config).await.unwrap_err();
    assert!(matches!(err, Arxiv2MdError::PaperNotFound { .. }), "{err:?}");
}

// ── LLM refinement ───────────────────────────────────────────────────────────

#[tokio::test]
async fn section_refinement_uses_chat_completions() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "deepseek-chat" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "```markdown\n## Cleaned\n\nClean text.\n```" } }]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let recorder = Arc::new(StageRecorder::default());
    let config = config_for(&server)
        .llm(LlmConfig::new(format!("{}/v1", server.uri()), "sk-test"))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let output = convert("2301.12345", &config).await.unwrap();

    assert!(output.refined);
    assert_eq!(output.stats.sections_refined, 2);
    assert_eq!(output.markdown.matches("Clean text.").count(), 2);
    assert!(!output.markdown.contains("```markdown"));
    // Compression blocks are never sent to the model.
    assert!(output.markdown.starts_with("## Authors"));
    assert!(output.markdown.contains("[1] C. Author. A prior result."));

    let progress = recorder.refine.lock().unwrap().clone();
    assert_eq!(progress.first(), Some(&(0, 2)));
    assert_eq!(progress.last(), Some(&(2, 2)));
    assert!(recorder
        .stages
        .lock()
        .unwrap()
        .contains(&Stage::Refining { full_input: false }));
}

#[tokio::test]
async fn full_input_refinement_keeps_prefix() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("We do things."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "Whole document, refined." } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server)
        .llm(LlmConfig::new(server.uri(), "sk-test").with_full_input(true))
        .build()
        .unwrap();
    let output = convert("2301.12345", &config).await.unwrap();

    assert!(output.markdown.starts_with("## Authors"));
    assert!(output.markdown.ends_with("Whole document, refined."));
    assert_eq!(output.stats.sections_refined, 1);
}

#[tokio::test]
async fn llm_error_message_is_surfaced() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "quota exceeded" }
        })))
        .mount(&server)
        .await;

    let config = config_for(&server)
        .llm(LlmConfig::new(server.uri(), "sk-test"))
        .build()
        .unwrap();
    let err = convert("2301.12345", &config).await.unwrap_err();
    assert!(matches!(err, Arxiv2MdError::LlmRequest(ref m) if m == "quota exceeded"), "{err:?}");
}

#[tokio::test]
async fn llm_and_extraction_are_mutually_exclusive() {
    let server = MockServer::start().await;

    let err = config_for(&server)
        .llm(LlmConfig::new(server.uri(), "sk-test"))
        .extraction_service(ExtractionServiceConfig::new("key").with_base_url(server.uri()))
        .build()
        .unwrap_err();
    assert!(matches!(err, Arxiv2MdError::InvalidConfig(_)));

    let mut settings = Settings::default();
    settings.llm.enabled = true;
    settings.llm.base_url = server.uri();
    settings.llm.api_key = "sk-test".into();
    settings.extraction.enabled = true;
    settings.extraction.api_key = "key".into();
    assert!(matches!(settings.engine(), Err(Arxiv2MdError::InvalidConfig(_))));

    assert!(server.received_requests().await.unwrap().is_empty());
}

// ── Extraction service ───────────────────────────────────────────────────────

#[tokio::test]
async fn extraction_service_submit_poll_download() {
    let server = arxiv_mock().await;
    let pdf_url = format!("{}/pdf/2301.12345v2.pdf", server.uri());
    let zip_url = format!("{}/results/t-1.zip", server.uri());

    Mock::given(method("POST"))
        .and(path("/api/v4/extract/task"))
        .and(header("authorization", "Bearer mineru-key"))
        .and(body_partial_json(json!({
            "url": pdf_url,
            "enable_formula": true,
            "enable_table": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "msg": "ok", "data": { "task_id": "t-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/extract/task/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "state": "running", "extract_progress": { "extracted_pages": 1, "total_pages": 4 } }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/extract/task/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "state": "done", "full_zip_url": zip_url }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/results/t-1.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zip_of(&[("layout.json", "{}"), ("full.md", "# A Test Paper\n\nExtracted body.\n")])),
        )
        .mount(&server)
        .await;
    // Never consulted: the extraction service reads the PDF itself.
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .expect(0)
        .mount(&server)
        .await;

    let recorder = Arc::new(StageRecorder::default());
    let config = config_for(&server)
        .extraction_service(ExtractionServiceConfig::new("mineru-key").with_base_url(server.uri()))
        .extraction_poll_interval_ms(10)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let output = convert("2301.12345", &config).await.unwrap();

    assert_eq!(output.source, SourceKind::ExtractionService);
    assert!(!output.refined);
    assert_eq!(output.markdown, "# A Test Paper\n\nExtracted body.");

    let stages = recorder.stages.lock().unwrap().clone();
    assert_eq!(
        stages,
        vec![
            Stage::FetchingMetadata,
            Stage::ExtractionSubmitting,
            Stage::ExtractionQueued,
            Stage::ExtractionRunning,
            Stage::ExtractionDownloading,
        ]
    );
}

#[tokio::test]
async fn extraction_failure_carries_reason() {
    let server = arxiv_mock().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/extract/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "task_id": "t-2" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/extract/task/t-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "state": "failed", "err_msg": "file too large" }
        })))
        .mount(&server)
        .await;

    let config = config_for(&server)
        .extraction_service(ExtractionServiceConfig::new("key").with_base_url(server.uri()))
        .extraction_poll_interval_ms(10)
        .build()
        .unwrap();
    let err = convert("2301.12345", &config).await.unwrap_err();
    assert!(matches!(err, Arxiv2MdError::ExtractionFailed(ref m) if m == "file too large"), "{err:?}");
}

#[tokio::test]
async fn extraction_reply_without_code_is_rejected() {
    let server = arxiv_mock().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/extract/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "msg": "quota exceeded", "data": { "task_id": "t-4" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/extract/task/t-4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(&server)
        .extraction_service(ExtractionServiceConfig::new("key").with_base_url(server.uri()))
        .build()
        .unwrap();
    let err = convert("2301.12345", &config).await.unwrap_err();
    assert!(matches!(err, Arxiv2MdError::ExtractionService(ref m) if m == "quota exceeded"), "{err:?}");
}

#[tokio::test]
async fn result_archive_without_markdown_is_refetched_through_proxy() {
    let server = arxiv_mock().await;
    let zip_url = format!("{}/results/t-5.zip", server.uri());
    Mock::given(method("POST"))
        .and(path("/api/v4/extract/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "task_id": "t-5" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/extract/task/t-5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "state": "done", "full_zip_url": zip_url }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/results/t-5.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_of(&[("images/a.png", "png")])))
        .expect(1)
        .mount(&server)
        .await;
    let full = zip_of(&[("full.md", "# Via proxy\n")]);
    Mock::given(method("POST"))
        .and(path("/api/network/forwardProxy"))
        .and(body_partial_json(json!({ "url": zip_url, "responseEncoding": "base64" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "status": 200, "bodyEncoding": "base64", "body": encode_base64(&full) }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server)
        .extraction_service(ExtractionServiceConfig::new("key").with_base_url(server.uri()))
        .extraction_poll_interval_ms(10)
        .proxy(ProxyConfig::new(server.uri(), None))
        .build()
        .unwrap();
    let output = convert("2301.12345", &config).await.unwrap();
    assert_eq!(output.source, SourceKind::ExtractionService);
    assert_eq!(output.markdown, "# Via proxy");
}

#[tokio::test]
async fn result_archive_without_markdown_and_no_proxy_fails() {
    let server = arxiv_mock().await;
    let zip_url = format!("{}/results/t-6.zip", server.uri());
    Mock::given(method("POST"))
        .and(path("/api/v4/extract/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "task_id": "t-6" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/extract/task/t-6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "state": "done", "full_zip_url": zip_url }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/results/t-6.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_of(&[("notes.txt", "nothing")])))
        .mount(&server)
        .await;

    let config = config_for(&server)
        .extraction_service(ExtractionServiceConfig::new("key").with_base_url(server.uri()))
        .extraction_poll_interval_ms(10)
        .build()
        .unwrap();
    let err = convert("2301.12345", &config).await.unwrap_err();
    assert!(matches!(err, Arxiv2MdError::ExtractionNoMarkdown), "{err:?}");
}

// ── PDF and forwarding proxy ─────────────────────────────────────────────────

#[tokio::test]
async fn pdf_download_direct() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/pdf/2301.12345v2.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF))
        .mount(&server)
        .await;

    let config = config_for(&server).build().unwrap();
    let pdf = fetch_pdf("2301.12345", &config).await.unwrap();
    assert_eq!(pdf.bytes, PDF);
    assert_eq!(pdf.file_name, "A_Test_Paper.pdf");
    assert_eq!(pdf.metadata.pdf_url, format!("{}/pdf/2301.12345v2.pdf", server.uri()));
}

#[tokio::test]
async fn restricted_context_falls_back_to_forwarding_proxy() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/pdf/2301.12345v2.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/network/forwardProxy"))
        .and(header("authorization", "Token secret"))
        .and(body_partial_json(json!({
            "method": "GET",
            "url": format!("{}/pdf/2301.12345v2.pdf", server.uri()),
            "responseEncoding": "base64",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "msg": "",
            "data": {
                "status": 200,
                "contentType": "application/pdf",
                "bodyEncoding": "base64",
                "body": encode_base64(PDF),
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server)
        .fetch_policy(FetchPolicy::Restricted)
        .proxy(ProxyConfig::new(server.uri(), Some("Token secret")))
        .build()
        .unwrap();
    let pdf = fetch_pdf("2301.12345", &config).await.unwrap();
    assert_eq!(pdf.bytes, PDF);
}

#[tokio::test]
async fn proxy_tries_second_endpoint() {
    let server = arxiv_mock().await;
    Mock::given(method("POST"))
        .and(path("/api/network/forwardProxy"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/system/proxy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "status": 200, "bodyEncoding": "base64", "body": encode_base64(PDF) }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server)
        .fetch_policy(FetchPolicy::Restricted)
        .proxy(ProxyConfig::new(server.uri(), None))
        .build()
        .unwrap();
    let pdf = fetch_pdf("2301.12345", &config).await.unwrap();
    assert_eq!(pdf.bytes, PDF);
}

#[tokio::test]
async fn unauthorised_proxy_is_reported_plainly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = ForwardProxyClient::new(reqwest::Client::new(), ProxyConfig::new(server.uri(), Some("wrong")));
    let err = client
        .forward(&ForwardProxyPayload::get("https://example.org/x.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, Arxiv2MdError::ProxyUnauthorized), "{err:?}");
}

#[tokio::test]
async fn every_channel_failing_is_summarised() {
    let server = arxiv_mock().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = config_for(&server)
        .fetch_policy(FetchPolicy::Restricted)
        .proxy(ProxyConfig::new(server.uri(), Some("wrong")))
        .build()
        .unwrap();
    let err = fetch_pdf("2301.12345", &config).await.unwrap_err();
    assert!(matches!(err, Arxiv2MdError::AllChannelsFailed { .. }), "{err:?}");
}

// ── Note host ────────────────────────────────────────────────────────────────

async fn mount_append_block(server: &MockServer, expected: &str) {
    Mock::given(method("POST"))
        .and(path("/api/block/appendBlock"))
        .and(header("authorization", "Token host-token"))
        .and(body_partial_json(json!({
            "dataType": "markdown",
            "data": expected,
            "parentID": "20240101120000-abcdefg",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "", "data": [] })))
        .expect(1)
        .mount(server)
        .await;
}

fn kernel_host(server: &MockServer) -> KernelHost {
    KernelHost::new(reqwest::Client::new(), server.uri(), Some("Token host-token"))
        .with_parent_id("20240101120000-abcdefg")
}

#[tokio::test]
async fn host_reuses_existing_pdf_asset() {
    let server = arxiv_mock().await;
    Mock::given(method("POST"))
        .and(path("/api/file/readDir"))
        .and(body_partial_json(json!({ "path": "/data/assets/" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [
                { "name": "A_Test_Paper.pdf", "isDir": false },
                { "name": "images", "isDir": true },
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pdf/2301.12345v2.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/asset/upload"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_append_block(&server, "[A_Test_Paper.pdf](/assets/A_Test_Paper.pdf)\n").await;

    let config = config_for(&server).build().unwrap();
    let outcome = insert_paper(&kernel_host(&server), "2301.12345", InsertMode::Pdf, &config)
        .await
        .unwrap();
    assert!(outcome.reused_asset);
    assert_eq!(outcome.asset_path.as_deref(), Some("/assets/A_Test_Paper.pdf"));
}

#[tokio::test]
async fn host_uploads_pdf_when_missing() {
    let server = arxiv_mock().await;
    Mock::given(method("POST"))
        .and(path("/api/file/readDir"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pdf/2301.12345v2.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/asset/upload"))
        .and(body_string_contains("A_Test_Paper.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "errFiles": [], "succMap": { "A_Test_Paper.pdf": "assets/A_Test_Paper-20240101.pdf" } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_append_block(&server, "[A_Test_Paper.pdf](assets/A_Test_Paper-20240101.pdf)\n").await;

    let recorder = Arc::new(StageRecorder::default());
    let config = config_for(&server)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let outcome = insert_paper(&kernel_host(&server), "2301.12345", InsertMode::Pdf, &config)
        .await
        .unwrap();

    assert!(!outcome.reused_asset);
    assert_eq!(outcome.source, None);
    assert_eq!(
        recorder.stages.lock().unwrap().clone(),
        vec![
            Stage::FetchingMetadata,
            Stage::CheckingExistingAsset,
            Stage::DownloadingPdf,
            Stage::UploadingPdf,
            Stage::Inserting,
        ]
    );
}

#[tokio::test]
async fn host_inserts_full_text() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/block/appendBlock"))
        .and(body_string_contains("We study things."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": null })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server).build().unwrap();
    let outcome = insert_paper(&kernel_host(&server), "2301.12345", InsertMode::FullText, &config)
        .await
        .unwrap();
    assert_eq!(outcome.source, Some(SourceKind::Html));
    assert!(outcome.inserted.ends_with('\n'));
}

#[tokio::test]
async fn host_error_code_is_surfaced() {
    let server = arxiv_mock().await;
    Mock::given(method("GET"))
        .and(path("/html/2301.12345v2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/block/appendBlock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": -1, "msg": "block not found" })))
        .mount(&server)
        .await;

    let config = config_for(&server).build().unwrap();
    let err = insert_paper(&kernel_host(&server), "2301.12345", InsertMode::FullText, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Arxiv2MdError::Host(ref m) if m.contains("block not found")), "{err:?}");
}
