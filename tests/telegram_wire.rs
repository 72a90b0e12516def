//! End-to-end over the Bot API wire format.
//!
//! A wiremock server plays Telegram: it serves `getFile` and the file
//! download, and accepts `sendMessage`, `editMessageText` and
//! `sendDocument`. Mail goes to an in-memory stub.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jv_report::channels::telegram_types::{InboundEvent, Payload};
use jv_report::channels::{Mailer, OutgoingMail, TelegramChannel};
use jv_report::config::Directories;
use jv_report::error::DeliveryError;
use jv_report::session::Session;
use jv_report::submission_log::SubmissionStatus;
use jv_report::{CompletionPipeline, IntakeGate, IntakeOutcome};

const OPERATOR: i64 = 555;

#[derive(Default)]
struct StubMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }

    fn recipient_count(&self) -> usize {
        1
    }
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn ok(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true, "result": result }))
}

async fn mock_telegram() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/getFile$"))
        .respond_with(ok(serde_json::json!({
            "file_id": "any",
            "file_path": "photos/file_7.jpg"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file/bot123:ABC/photos/file_7.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg_bytes(64, 48)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/sendMessage$"))
        .respond_with(ok(serde_json::json!({ "message_id": 900 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/editMessageText$"))
        .respond_with(ok(serde_json::json!(true)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/sendDocument$"))
        .respond_with(ok(serde_json::json!({ "message_id": 901 })))
        .mount(&server)
        .await;

    server
}

fn photo(file_id: &str) -> InboundEvent {
    InboundEvent {
        chat_id: OPERATOR,
        payload: Payload::Photo {
            file_id: file_id.into(),
        },
    }
}

#[tokio::test]
async fn photos_downloaded_and_pdf_sent_back() {
    let server = mock_telegram().await;
    let dir = tempfile::tempdir().unwrap();
    let dirs = Directories::under(dir.path());
    dirs.ensure().unwrap();

    let telegram = Arc::new(TelegramChannel::new(
        SecretString::from("123:ABC".to_string()),
        server.uri(),
    ));
    let mailer = Arc::new(StubMailer::default());
    let pipeline = CompletionPipeline::new(telegram.clone(), mailer.clone(), dirs.clone(), "Regards");
    let gate = IntakeGate::new(
        OPERATOR,
        dirs.downloads.clone(),
        Arc::new(Session::new()),
        telegram,
        pipeline,
    );

    assert!(matches!(
        gate.handle(photo("a")).await,
        IntakeOutcome::PhotoQueued { count: 1, .. }
    ));
    assert!(matches!(
        gate.handle(photo("b")).await,
        IntakeOutcome::PhotoQueued { count: 2, .. }
    ));

    let outcome = gate
        .handle(InboundEvent {
            chat_id: OPERATOR,
            payload: Payload::Text("/siteid 1333453".into()),
        })
        .await;

    let IntakeOutcome::Submitted(report) = outcome else {
        panic!("expected Submitted, got {outcome:?}");
    };
    assert_eq!(report.status, SubmissionStatus::Success);
    assert_eq!(mailer.sent.lock().unwrap().len(), 1);

    let requests = server.received_requests().await.unwrap();
    let count = |suffix: &str| {
        requests
            .iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .count()
    };
    assert_eq!(count("/getFile"), 2);
    assert_eq!(count("/sendDocument"), 1);
    assert!(count("/editMessageText") >= 1);

    let acks: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path().ends_with("/sendMessage"))
        .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
        .filter_map(|v| v["text"].as_str().map(str::to_string))
        .filter(|t| t.starts_with("📸"))
        .collect();
    assert_eq!(acks, vec!["📸 Photo 1 received", "📸 Photo 2 received"]);
}

#[tokio::test]
async fn missing_file_is_not_queued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/getFile$"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "ok": false,
            "description": "Bad Request: invalid file_id"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/sendMessage$"))
        .respond_with(ok(serde_json::json!({ "message_id": 1 })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dirs = Directories::under(dir.path());
    dirs.ensure().unwrap();
    let telegram = Arc::new(TelegramChannel::new(
        SecretString::from("123:ABC".to_string()),
        server.uri(),
    ));
    let session = Arc::new(Session::new());
    let pipeline = CompletionPipeline::new(
        telegram.clone(),
        Arc::new(StubMailer::default()),
        dirs.clone(),
        "Regards",
    );
    let gate = IntakeGate::new(OPERATOR, dirs.downloads.clone(), session.clone(), telegram, pipeline);

    let outcome = gate.handle(photo("bogus")).await;

    let IntakeOutcome::DownloadFailed { reason } = outcome else {
        panic!("expected DownloadFailed, got {outcome:?}");
    };
    assert!(reason.contains("invalid file_id"), "{reason}");
    assert!(session.is_empty().await);
}
