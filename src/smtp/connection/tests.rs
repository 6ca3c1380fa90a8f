use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use super::*;
use crate::smtp::host::DefaultHost;
use crate::smtp::testing::{spawn_session, test_connection, test_connection_with};

#[derive(Default)]
struct CountingHost {
    completed: AtomicUsize,
    completed_error: Mutex<Option<String>>,
}

#[async_trait]
impl SmtpHost for CountingHost {
    async fn on_session_completed(&self, session: &Session) -> anyhow::Result<()> {
        self.completed.fetch_add(1, Ordering::SeqCst);
        *self.completed_error.lock().unwrap() = session.error().map(str::to_string);
        Ok(())
    }
}

fn options_with_max_bad(max: u32) -> ServerOptions {
    ServerOptions::builder().max_bad_commands(max).build()
}

#[tokio::test]
async fn bad_command_limit_closes_after_exactly_max_lines() {
    let (task, mut client) = spawn_session(options_with_max_bad(3), Arc::new(DefaultHost)).await;

    // the 221 must arrive without a fourth line ever being sent
    client.send_raw(b"BOGUS1\r\nBOGUS2\r\nBOGUS3\r\n").await;
    assert_eq!(client.code().await, 500);
    assert_eq!(client.code().await, 500);
    assert_eq!(client.code().await, 500);
    assert_eq!(client.code().await, 221);
    assert!(client.read_to_close().await.is_empty());

    let session = task.await.unwrap();
    assert_eq!(session.log().matches("BOGUS").count(), 3);
}

#[tokio::test]
async fn empty_lines_count_as_bad_without_response() {
    let (task, mut client) = spawn_session(options_with_max_bad(2), Arc::new(DefaultHost)).await;
    client.send_raw(b"\r\n\r\n").await;
    assert_eq!(client.code().await, 221);
    task.await.unwrap();
}

#[tokio::test]
async fn recognised_command_resets_bad_count() {
    let (task, mut client) = spawn_session(options_with_max_bad(2), Arc::new(DefaultHost)).await;
    for _ in 0..3 {
        client.send("WHAT").await;
        assert_eq!(client.code().await, 500);
        client.send("NOOP").await;
        assert_eq!(client.code().await, 250);
    }
    client.send("QUIT").await;
    assert_eq!(client.code().await, 221);
    task.await.unwrap();
}

#[tokio::test]
async fn invalid_verb_syntax_is_unrecognised() {
    let (task, mut client) = spawn_session(ServerOptions::default(), Arc::new(DefaultHost)).await;
    client.send("NOOP!").await;
    assert_eq!(client.code().await, 500);
    client.send("QUIT").await;
    assert_eq!(client.code().await, 221);
    task.await.unwrap();
}

#[tokio::test]
async fn verbs_are_case_insensitive() {
    let (task, mut client) = spawn_session(ServerOptions::default(), Arc::new(DefaultHost)).await;
    client.send("noop").await;
    assert_eq!(client.code().await, 250);
    client.send("qUiT").await;
    assert_eq!(client.code().await, 221);
    task.await.unwrap();
}

struct FailingHost;

#[async_trait]
impl SmtpHost for FailingHost {
    async fn on_message_start(&self, _session: &Session, from: &str) -> anyhow::Result<()> {
        if from == "blocked@example.com" {
            return Err(SmtpServerError::with(ResponseCode::MAILBOX_UNAVAILABLE, "Sender blocked").into());
        }
        Err(anyhow!("database unavailable"))
    }
}

#[tokio::test]
async fn hook_errors_become_responses_and_session_continues() {
    let (task, mut client) = spawn_session(ServerOptions::default(), Arc::new(FailingHost)).await;

    client.send("MAIL FROM:<blocked@example.com>").await;
    assert_eq!(client.code().await, 450);

    client.send("MAIL FROM:<anyone@example.com>").await;
    assert_eq!(client.code().await, 500);

    client.send("NOOP").await;
    assert_eq!(client.code().await, 250);
    client.send("QUIT").await;
    assert_eq!(client.code().await, 221);
    task.await.unwrap();
}

struct RejectingGreetingHost;

#[async_trait]
impl SmtpHost for RejectingGreetingHost {
    async fn greeting(&self, _session: &Session, _domain: &str) -> anyhow::Result<SmtpResponse> {
        Ok(SmtpResponse::new(ResponseCode::TRANSACTION_FAILED, "No service for you"))
    }
}

#[tokio::test]
async fn error_greeting_closes_without_reading() {
    let (connection, mut client) = test_connection_with(
        ServerOptions::default(),
        Arc::new(RejectingGreetingHost),
        CancellationToken::new(),
    )
    .await;
    let task = tokio::spawn(connection.process());
    assert_eq!(client.code().await, 554);
    assert!(client.read_to_close().await.is_empty());
    let session = task.await.unwrap();
    assert!(session.is_completed());
}

#[tokio::test]
async fn idle_timeout_sends_421_and_closes() {
    let host = Arc::new(CountingHost::default());
    let options = ServerOptions::builder()
        .idle_timeout(Some(Duration::from_millis(100)))
        .build();
    let (task, mut client) = spawn_session(options, host.clone()).await;

    assert_eq!(client.code().await, 421);
    assert!(client.read_to_close().await.is_empty());
    let session = task.await.unwrap();
    assert!(session.error().unwrap().contains("idle timeout"));
    assert_eq!(host.completed.load(Ordering::SeqCst), 1);
    assert_eq!(
        host.completed_error.lock().unwrap().as_deref(),
        session.error()
    );
}

#[tokio::test]
async fn kill_unblocks_pending_read() {
    let cancel = CancellationToken::new();
    let (connection, mut client) =
        test_connection_with(ServerOptions::default(), Arc::new(DefaultHost), cancel.clone()).await;
    let task = tokio::spawn(connection.process());
    assert_eq!(client.code().await, 220);

    cancel.cancel();
    let session = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("killed connection did not finish")
        .unwrap();
    assert!(session.error().unwrap().contains("killed"));
}

#[tokio::test]
async fn peer_disconnect_completes_session_once() {
    let host = Arc::new(CountingHost::default());
    let (task, mut client) = spawn_session(ServerOptions::default(), host.clone()).await;
    client.send("HELO client").await;
    assert_eq!(client.code().await, 250);
    drop(client);

    let session = task.await.unwrap();
    assert!(session.is_completed());
    assert_eq!(host.completed.load(Ordering::SeqCst), 1);
    assert_eq!(session.client_name(), Some("client"));
}

#[tokio::test]
async fn new_message_while_in_progress_is_rejected() {
    let (mut connection, _client) = test_connection(ServerOptions::default()).await;
    connection.new_message().await.unwrap();

    match connection.new_message().await {
        Err(VerbError::Response(e)) => {
            assert_eq!(e.response().code(), ResponseCode::BAD_SEQUENCE_OF_COMMANDS)
        }
        other => panic!("expected 503, got {other:?}"),
    }

    connection.abort_message();
    assert!(connection.current_message().is_none());
    connection.new_message().await.unwrap();
    assert!(connection.current_message().is_some());
}

#[tokio::test]
async fn commit_adds_message_to_session() {
    let options = ServerOptions::builder()
        .message_store(MessageStore::File(None))
        .build();
    let (mut connection, _client) = test_connection(options).await;
    connection.new_message().await.unwrap();
    {
        let message = connection.current_message_mut().unwrap();
        message.envelope_mut().from = "a@b.com".into();
        message.envelope_mut().to.push("c@d.com".into());
    }

    let message = connection.commit_message().await.unwrap();
    assert!(message.file_path().is_some());
    assert!(connection.current_message().is_none());
    assert_eq!(connection.session().messages().len(), 1);
    assert_eq!(connection.session().messages()[0].from(), "a@b.com");
}

#[tokio::test]
async fn transcript_records_commands_and_responses() {
    let (task, mut client) = spawn_session(ServerOptions::default(), Arc::new(DefaultHost)).await;
    client.send("NOOP").await;
    assert_eq!(client.code().await, 250);
    client.send("QUIT").await;
    assert_eq!(client.code().await, 221);

    let session = task.await.unwrap();
    let log = session.log();
    assert!(log.starts_with("220 "));
    assert!(log.contains("NOOP\r\n250 Successfully did nothing\r\n"));
    assert!(log.ends_with("QUIT\r\n221 Goodbye\r\n"));
}

fn options_with_max_line(max: usize) -> ServerOptions {
    ServerOptions::builder().max_line_length(max).build()
}

fn overlong_line(prefix: &str) -> Vec<u8> {
    let mut line = prefix.as_bytes().to_vec();
    line.extend(std::iter::repeat(b'x').take(4096));
    line.extend_from_slice(b"\r\n");
    line
}

#[tokio::test]
async fn overlong_command_gets_500_and_session_continues() {
    let (task, mut client) = spawn_session(options_with_max_line(1024), Arc::new(DefaultHost)).await;

    client.send_raw(&overlong_line("NOOP ")).await;
    assert_eq!(client.read_response().await, vec!["500 Line too long".to_string()]);

    client.send("NOOP").await;
    assert_eq!(client.code().await, 250);
    client.send("QUIT").await;
    assert_eq!(client.code().await, 221);

    let session = task.await.unwrap();
    assert_eq!(session.error(), None);
}

#[tokio::test]
async fn overlong_data_line_rejects_message_after_terminator() {
    let (task, mut client) = spawn_session(options_with_max_line(1024), Arc::new(DefaultHost)).await;

    client.send("MAIL FROM:<a@b.com>").await;
    assert_eq!(client.code().await, 250);
    client.send("RCPT TO:<c@d.com>").await;
    assert_eq!(client.code().await, 250);
    client.send("DATA").await;
    assert_eq!(client.code().await, 354);

    client.send_raw(b"Subject: long\r\n").await;
    client.send_raw(&overlong_line("")).await;
    client.send_raw(b"tail\r\n.\r\n").await;
    assert_eq!(client.code().await, 500);

    // the transaction is gone but the connection is not
    client.send("RCPT TO:<c@d.com>").await;
    assert_eq!(client.code().await, 503);
    client.send("QUIT").await;
    assert_eq!(client.code().await, 221);

    let session = task.await.unwrap();
    assert!(session.messages().is_empty());
    assert_eq!(session.error(), None);
}

struct FailingStartHost;

#[async_trait]
impl SmtpHost for FailingStartHost {
    async fn on_session_started(&self, _session: &Session) -> anyhow::Result<()> {
        Err(anyhow!("policy store offline"))
    }
}

#[tokio::test]
async fn failing_session_started_hook_sends_421() {
    let (connection, mut client) = test_connection_with(
        ServerOptions::default(),
        Arc::new(FailingStartHost),
        CancellationToken::new(),
    )
    .await;
    let task = tokio::spawn(connection.process());

    assert_eq!(client.code().await, 421);
    assert!(client.read_to_close().await.is_empty());
    let session = task.await.unwrap();
    assert!(session.is_completed());
    assert!(session.error().unwrap().contains("Session started"));
}

struct FailingExtensionsHost;

#[async_trait]
impl SmtpHost for FailingExtensionsHost {
    async fn get_extensions(
        &self,
        _session: &Session,
        _defaults: Vec<Arc<dyn Extension>>,
    ) -> anyhow::Result<Vec<Arc<dyn Extension>>> {
        Err(anyhow!("extension registry unavailable"))
    }
}

#[tokio::test]
async fn failing_extension_hook_sends_421() {
    let (connection, mut client) = test_connection_with(
        ServerOptions::default(),
        Arc::new(FailingExtensionsHost),
        CancellationToken::new(),
    )
    .await;
    let task = tokio::spawn(connection.process());

    assert_eq!(client.code().await, 421);
    assert!(client.read_to_close().await.is_empty());
    task.await.unwrap();
}

struct NoExtensionsHost;

#[async_trait]
impl SmtpHost for NoExtensionsHost {
    async fn get_extensions(
        &self,
        _session: &Session,
        _defaults: Vec<Arc<dyn Extension>>,
    ) -> anyhow::Result<Vec<Arc<dyn Extension>>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn host_chosen_extensions_drive_ehlo_and_parameters() {
    let (task, mut client) = spawn_session(ServerOptions::default(), Arc::new(NoExtensionsHost)).await;

    client.send("EHLO client").await;
    assert_eq!(client.read_response().await.len(), 1);
    client.send("MAIL FROM:<a@b.com> SIZE=10").await;
    assert_eq!(client.code().await, 501);
    client.send("AUTH PLAIN").await;
    assert_eq!(client.code().await, 500);
    client.send("QUIT").await;
    assert_eq!(client.code().await, 221);
    task.await.unwrap();
}
