#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::mock_analyzer::MockAnalyzerServer;
    use crate::protocol::{ConfigMessage, ResultMessage, TAG_CONFIG, TAG_FRAME};
    use crate::transport::{
        read_framed, read_result, write_framed, write_result, ChannelOptions, ChannelSender,
        QuicAnalyzerChannel, MAX_MESSAGE_SIZE,
    };
    use crate::types::ExerciseMode;

    #[tokio::test]
    async fn test_framed_messages_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let config = serde_json::to_vec(&ConfigMessage::new(ExerciseMode::Curl)).unwrap();
        write_framed(&mut client, TAG_CONFIG, &config).await.unwrap();
        write_framed(&mut client, TAG_FRAME, &[1, 2, 3, 4]).await.unwrap();
        drop(client);

        let (tag, payload) = read_framed(&mut server).await.unwrap().unwrap();
        assert_eq!(tag, TAG_CONFIG);
        let decoded: ConfigMessage = serde_json::from_slice(&payload).unwrap();
        assert!(decoded.config);
        assert_eq!(decoded.mode, ExerciseMode::Curl);

        let (tag, payload) = read_framed(&mut server).await.unwrap().unwrap();
        assert_eq!(tag, TAG_FRAME);
        assert_eq!(payload, vec![1, 2, 3, 4]);

        // Clean EOF after the writer hangs up.
        assert!(read_framed(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_result_messages_round_trip() {
        let (mut analyzer, mut client) = tokio::io::duplex(4096);

        let message = ResultMessage {
            processed_image: Some("aW1n".to_string()),
            reps: 2,
            feedback: Some("STAND".to_string()),
            color: "cyan".to_string(),
            angle: Some(165.0),
        };
        let json = serde_json::to_vec(&message).unwrap();
        write_result(&mut analyzer, &json).await.unwrap();
        drop(analyzer);

        let payload = read_result(&mut client).await.unwrap().unwrap();
        let decoded: ResultMessage = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded.reps, 2);
        assert_eq!(decoded.angle, Some(165.0));

        assert!(read_result(&mut client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (mut writer, mut reader) = tokio::io::duplex(64);

        // Hand-craft a length prefix past the cap.
        let bogus_len = (MAX_MESSAGE_SIZE + 1).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut writer, &bogus_len)
            .await
            .unwrap();

        let result = read_result(&mut reader).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_truncated_message_is_an_error() {
        let (mut writer, mut reader) = tokio::io::duplex(64);

        // Announce 100 bytes, deliver 3, hang up.
        tokio::io::AsyncWriteExt::write_all(&mut writer, &100u32.to_le_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut writer, &[1, 2, 3])
            .await
            .unwrap();
        drop(writer);

        assert!(read_result(&mut reader).await.is_err());
    }

    /// Full loopback: client channel against the mock analyzer over QUIC.
    #[tokio::test]
    async fn test_quic_channel_end_to_end() {
        let mut server = MockAnalyzerServer::new();
        let addr = server
            .start("127.0.0.1:0".parse().unwrap())
            .await
            .expect("mock analyzer failed to start");

        let options = ChannelOptions {
            connection_timeout: Duration::from_secs(5),
            ..ChannelOptions::default()
        };
        let (sender, mut messages) = QuicAnalyzerChannel::connect(addr, &options)
            .await
            .expect("client failed to connect");

        assert!(sender.is_open());

        sender
            .send_config(&ConfigMessage::new(ExerciseMode::Squat))
            .await
            .unwrap();

        // A minimal encoded frame: dimension header plus one pixel.
        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&[10, 20, 30]);
        sender.send_frame(&frame).await.unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .expect("timed out waiting for analyzer result")
            .expect("message stream ended early");

        let message: ResultMessage = serde_json::from_str(&raw).unwrap();
        assert!(message.processed_image.is_some());
        assert!(message.feedback.is_some());

        server.shutdown();
    }
}
