use super::*;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

fn reader_over(bytes: &[u8]) -> LineReader<Cursor<Vec<u8>>> {
    LineReader::new(Cursor::new(bytes.to_vec()))
}

async fn write_with_line_writer(text: &str) -> Vec<u8> {
    let mut writer = LineWriter::new(Vec::new());
    writer.write_line(text).await.unwrap();
    writer.into_inner().await.unwrap()
}

// --- LineWriter ---

#[tokio::test]
async fn write_line_appends_exactly_one_crlf() {
    for text in ["250 OK", "", "ends with cr\r", "ends with lf\n", "ends with both\r\n\r\n", "héllo wörld ✉"] {
        let bytes = write_with_line_writer(text).await;
        assert!(bytes.ends_with(b"\r\n"), "{text:?}");
        assert!(!bytes[..bytes.len() - 2].ends_with(b"\r"), "{text:?}");
        assert!(!bytes[..bytes.len() - 2].ends_with(b"\n"), "{text:?}");
    }
}

#[tokio::test]
async fn write_line_keeps_embedded_line_breaks() {
    let bytes = write_with_line_writer("a\nb").await;
    assert_eq!(bytes, b"a\nb\r\n");
}

#[tokio::test]
async fn write_is_verbatim() {
    let mut writer = LineWriter::new(Vec::new());
    writer.write("no newline").await.unwrap();
    writer.write("..dot\n").await.unwrap();
    writer.write_bytes(&[0xff, 0x00]).await.unwrap();
    let bytes = writer.into_inner().await.unwrap();
    assert_eq!(bytes, b"no newline..dot\n\xff\x00");
}

#[tokio::test]
async fn unicode_is_written_as_utf8() {
    let bytes = write_with_line_writer("Grüße").await;
    assert_eq!(bytes, "Grüße\r\n".as_bytes());
}

#[tokio::test]
async fn large_payload_is_not_truncated() {
    let (client, mut server) = duplex(1024);
    let payload: String = (0..80_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let expected = payload.clone();

    let writer_task = tokio::spawn(async move {
        let mut writer = LineWriter::new(client);
        writer.write_line(&payload).await.unwrap();
        writer.flush().await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let mut received = Vec::new();
    server.read_to_end(&mut received).await.unwrap();
    writer_task.await.unwrap();

    assert_eq!(received.len(), expected.len() + 2);
    assert_eq!(&received[..expected.len()], expected.as_bytes());
}

#[tokio::test]
async fn into_inner_leaves_stream_usable() {
    let (client, mut server) = duplex(64);
    let mut writer = LineWriter::new(client);
    writer.write_line("first").await.unwrap();
    let mut stream = writer.into_inner().await.unwrap();
    stream.write_all(b"second\r\n").await.unwrap();
    drop(stream);

    let mut received = String::new();
    server.read_to_string(&mut received).await.unwrap();
    assert_eq!(received, "first\r\nsecond\r\n");
}

// --- LineReader ---

#[tokio::test]
async fn reads_crlf_and_bare_lf_lines() {
    let mut reader = reader_over(b"HELO a\r\nMAIL FROM:<x@y>\nQUIT\r\n");
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("HELO a"));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("MAIL FROM:<x@y>"));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("QUIT"));
    assert_eq!(reader.read_line().await.unwrap(), None);
}

#[tokio::test]
async fn empty_lines_are_returned_as_empty() {
    let mut reader = reader_over(b"\r\n\n");
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some(""));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some(""));
    assert_eq!(reader.read_line().await.unwrap(), None);
}

#[tokio::test]
async fn clean_eof_returns_none() {
    let mut reader = reader_over(b"");
    assert_eq!(reader.read_line().await.unwrap(), None);
}

#[tokio::test]
async fn unterminated_final_line_is_returned() {
    let mut reader = reader_over(b"QUIT");
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("QUIT"));
    assert_eq!(reader.read_line().await.unwrap(), None);
}

#[tokio::test]
async fn invalid_utf8_uses_latin1_fallback() {
    let mut reader = reader_over(b"Subject: caf\xe9\r\n");
    assert_eq!(
        reader.read_line().await.unwrap().as_deref(),
        Some("Subject: café")
    );
}

#[tokio::test]
async fn ascii_fallback_uses_placeholder() {
    let mut reader = reader_over(b"caf\xe9 \xff\r\n").with_fallback(FallbackEncoding::Ascii);
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("caf? ?"));
}

#[tokio::test]
async fn valid_utf8_is_preferred_over_fallback() {
    let mut reader = reader_over("Grüße\r\n".as_bytes());
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("Grüße"));
}

#[tokio::test]
async fn raw_bytes_are_preserved() {
    let mut reader = reader_over(b"\x00\xff\xfe.\r\n");
    assert_eq!(
        reader.read_line_bytes().await.unwrap(),
        Some(vec![0x00, 0xff, 0xfe, b'.'])
    );
}

#[tokio::test]
async fn overlong_line_is_rejected() {
    let mut input = vec![b'a'; 200];
    input.extend_from_slice(b"\r\n");
    let mut reader = reader_over(&input).with_max_line_length(100);
    assert!(matches!(
        reader.read_line().await,
        Err(ConnectionError::LineTooLong { max: 100 })
    ));
}

#[tokio::test]
async fn reading_resumes_after_overlong_line() {
    // longer than one read chunk, so the reader has to skip across reads
    let mut input = b"NOOP ".to_vec();
    input.extend(std::iter::repeat(b'x').take(10_000));
    input.extend_from_slice(b"\r\nQUIT\r\n");
    let mut reader = reader_over(&input).with_max_line_length(1024);

    assert!(matches!(
        reader.read_line().await,
        Err(ConnectionError::LineTooLong { max: 1024 })
    ));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("QUIT"));
    assert_eq!(reader.read_line().await.unwrap(), None);
}

#[tokio::test]
async fn overlong_line_cut_by_eof_is_reported_once() {
    let input = vec![b'y'; 500];
    let mut reader = reader_over(&input).with_max_line_length(100);
    assert!(matches!(
        reader.read_line().await,
        Err(ConnectionError::LineTooLong { .. })
    ));
    assert_eq!(reader.read_line().await.unwrap(), None);
}

#[tokio::test]
async fn cancelled_read_does_not_lose_data() {
    let (mut client, server) = duplex(64);
    let mut reader = LineReader::new(server);

    client.write_all(b"HEL").await.unwrap();
    let first = tokio::time::timeout(Duration::from_millis(50), reader.read_line()).await;
    assert!(first.is_err(), "read should still be pending");

    client.write_all(b"O there\r\nNOOP\r\n").await.unwrap();
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("HELO there"));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("NOOP"));
}

#[test]
fn fallback_encoding_parses_names() {
    assert_eq!("latin1".parse::<FallbackEncoding>(), Ok(FallbackEncoding::Latin1));
    assert_eq!("US-ASCII".parse::<FallbackEncoding>(), Ok(FallbackEncoding::Ascii));
    assert!("ebcdic".parse::<FallbackEncoding>().is_err());
}
