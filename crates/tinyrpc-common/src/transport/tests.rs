#[cfg(test)]
mod tests {
    use crate::protocol::{CodecType, Header, Options, RpcError, MAGIC_NUMBER};
    use crate::transport::*;
    use tokio::io::{duplex, AsyncWriteExt};

    fn pair(codec_type: CodecType) -> (
        CodecWriter<tokio::io::DuplexStream>,
        CodecReader<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(64 * 1024);
        let codec = Codec::from(codec_type);
        (CodecWriter::new(a, codec), CodecReader::new(b, codec))
    }

    #[tokio::test]
    async fn test_send_receive_message() {
        let (mut a, mut b) = duplex(1024);
        send_message(&mut a, b"hello").await.unwrap();
        a.flush().await.unwrap();
        assert_eq!(receive_message(&mut b).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_receive_on_closed_stream_is_connection_closed() {
        let (a, mut b) = duplex(1024);
        drop(a);
        assert!(matches!(receive_message(&mut b).await, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_connection_error() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert!(matches!(receive_message(&mut b).await, Err(RpcError::Connection(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert!(matches!(
            receive_message(&mut b).await,
            Err(RpcError::MessageTooLarge(_, MAX_MESSAGE_SIZE))
        ));
    }

    #[tokio::test]
    async fn test_options_handshake() {
        let (mut a, mut b) = duplex(1024);
        let opt = Options::new(CodecType::Json);
        write_options(&mut a, &opt).await.unwrap();

        let received = read_options(&mut b).await.unwrap();
        assert_eq!(received, opt);
        assert_eq!(received.validate().unwrap(), CodecType::Json);
    }

    #[tokio::test]
    async fn test_options_handshake_bad_magic() {
        let (mut a, mut b) = duplex(1024);
        let opt = Options {
            magic_number: MAGIC_NUMBER + 1,
            ..Options::default()
        };
        write_options(&mut a, &opt).await.unwrap();

        let received = read_options(&mut b).await.unwrap();
        assert!(matches!(received.validate(), Err(RpcError::InvalidMagicNumber(_))));
    }

    #[tokio::test]
    async fn test_header_body_pair() {
        for codec_type in [CodecType::Json, CodecType::Postcard] {
            let (mut writer, mut reader) = pair(codec_type);
            let header = Header::new("Foo.Sum", 1);
            writer.write(&header, &(3i64, 4i64)).await.unwrap();

            assert_eq!(reader.read_header().await.unwrap(), header);
            let body: (i64, i64) = reader.read_body().await.unwrap();
            assert_eq!(body, (3, 4));
        }
    }

    #[tokio::test]
    async fn test_discard_body_keeps_stream_in_sync() {
        let (mut writer, mut reader) = pair(CodecType::Postcard);
        writer.write(&Header::new("A.One", 1), "skip me").await.unwrap();
        writer.write(&Header::new("A.Two", 2), &42u32).await.unwrap();

        assert_eq!(reader.read_header().await.unwrap().seq, 1);
        reader.discard_body().await.unwrap();

        assert_eq!(reader.read_header().await.unwrap().seq, 2);
        assert_eq!(reader.read_body::<u32>().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_encode_failure_poisons_writer() {
        let (mut writer, mut reader) = pair(CodecType::Json);
        let err = writer
            .write_encoded(&Header::new("A.B", 1), Err(RpcError::InvalidRequest("bad".into())))
            .await;
        assert!(err.is_err());
        assert!(writer.is_closed());

        // nothing was written and the stream is shut down
        assert!(matches!(reader.read_header().await, Err(RpcError::ConnectionClosed)));
        assert!(matches!(
            writer.write(&Header::new("A.B", 2), &()).await,
            Err(RpcError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut writer, _reader) = pair(CodecType::Json);
        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn test_body_missing_after_header() {
        let (mut a, b) = duplex(1024);
        let codec = Codec::from(CodecType::Json);
        let header = codec.encode(&Header::new("A.B", 1)).unwrap();
        send_message(&mut a, &header).await.unwrap();
        drop(a);

        let mut reader = CodecReader::new(b, codec);
        reader.read_header().await.unwrap();
        assert!(matches!(reader.discard_body().await, Err(RpcError::Connection(_))));
    }
}
