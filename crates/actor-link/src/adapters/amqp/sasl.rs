//! SASL EXTERNAL over an already-secured stream.
//!
//! The AMQP stack only ships ANONYMOUS and PLAIN profiles, so the SASL
//! layer is negotiated here before the stream is handed over for the AMQP
//! open. The broker authenticates from the TLS client certificate; the
//! initial response optionally carries the certificate common name.

use fe2o3_amqp::types::primitives::{Binary, Symbol};
use fe2o3_amqp::types::sasl::{SaslCode, SaslInit, SaslMechanisms, SaslOutcome};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::domain::LinkError;

/// Protocol header announcing the SASL layer (protocol id 3, version 1.0.0).
pub const SASL_HEADER: [u8; 8] = *b"AMQP\x03\x01\x00\x00";

/// SASL mechanism name.
pub const EXTERNAL: &str = "EXTERNAL";

const SASL_FRAME_TYPE: u8 = 0x01;
const FRAME_HEADER_LEN: usize = 8;
const MAX_SASL_FRAME: usize = 64 * 1024;

/// Run the SASL exchange: header, mechanisms, init, outcome.
pub async fn authenticate_external<S>(
    stream: &mut S,
    hostname: &str,
    identity: Option<&str>,
) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&SASL_HEADER).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await.map_err(io_error)?;
    if header != SASL_HEADER {
        return Err(LinkError::Transport(format!(
            "peer answered SASL header with {:?}",
            header
        )));
    }

    let mechanisms: SaslMechanisms = read_performative(stream).await?;
    let offered: Vec<String> = mechanisms
        .sasl_server_mechanisms
        .0
        .iter()
        .map(|m| m.0.clone())
        .collect();
    debug!(mechanisms = ?offered, "[link] SASL mechanisms offered");
    if !offered.iter().any(|m| m == EXTERNAL) {
        return Err(LinkError::Transport(format!(
            "SASL {} not offered (got {:?})",
            EXTERNAL, offered
        )));
    }

    let init = SaslInit {
        mechanism: Symbol::from(EXTERNAL),
        initial_response: Some(Binary::from(
            identity.unwrap_or_default().as_bytes().to_vec(),
        )),
        hostname: Some(hostname.to_string()),
    };
    let body = serde_amqp::to_vec(&init).map_err(|e| LinkError::Encode(e.to_string()))?;
    stream
        .write_all(&encode_frame(&body))
        .await
        .map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    let outcome: SaslOutcome = read_performative(stream).await?;
    match outcome.code {
        SaslCode::Ok => {
            debug!("[link] SASL {} succeeded", EXTERNAL);
            Ok(())
        }
        code => Err(LinkError::Transport(format!(
            "SASL {} rejected with code {:?}",
            EXTERNAL, code
        ))),
    }
}

/// Wrap a performative body into a SASL frame on channel 0.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let size = (FRAME_HEADER_LEN + body.len()) as u32;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.push(2); // data offset in 4-byte words
    frame.push(SASL_FRAME_TYPE);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(body);
    frame
}

/// Body of a SASL frame given everything after its size field.
pub fn frame_body(after_size: &[u8]) -> Result<&[u8], LinkError> {
    if after_size.len() < FRAME_HEADER_LEN - 4 {
        return Err(LinkError::Transport("truncated SASL frame".into()));
    }
    let doff = after_size[0] as usize;
    let frame_type = after_size[1];
    if frame_type != SASL_FRAME_TYPE {
        return Err(LinkError::Transport(format!(
            "expected SASL frame, got frame type {:#04x}",
            frame_type
        )));
    }
    let offset = (doff * 4)
        .checked_sub(4)
        .filter(|offset| *offset >= FRAME_HEADER_LEN - 4 && *offset <= after_size.len())
        .ok_or_else(|| LinkError::Transport(format!("invalid SASL data offset {}", doff)))?;
    Ok(&after_size[offset..])
}

async fn read_frame<S>(stream: &mut S) -> Result<Vec<u8>, LinkError>
where
    S: AsyncRead + Unpin,
{
    let mut size = [0u8; 4];
    stream.read_exact(&mut size).await.map_err(io_error)?;
    let size = u32::from_be_bytes(size) as usize;
    if !(FRAME_HEADER_LEN..=MAX_SASL_FRAME).contains(&size) {
        return Err(LinkError::Transport(format!("invalid SASL frame size {}", size)));
    }

    let mut rest = vec![0u8; size - 4];
    stream.read_exact(&mut rest).await.map_err(io_error)?;
    Ok(frame_body(&rest)?.to_vec())
}

async fn read_performative<S, T>(stream: &mut S) -> Result<T, LinkError>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let body = read_frame(stream).await?;
    serde_amqp::from_slice(&body)
        .map_err(|e| LinkError::Transport(format!("undecodable SASL frame: {}", e)))
}

fn io_error(error: std::io::Error) -> LinkError {
    LinkError::Transport(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fe2o3_amqp::types::primitives::Array;
    use tokio::io::{duplex, DuplexStream};

    async fn write_performative<T: serde::Serialize>(stream: &mut DuplexStream, value: &T) {
        let body = serde_amqp::to_vec(value).unwrap();
        stream.write_all(&encode_frame(&body)).await.unwrap();
    }

    /// Broker side of the exchange. Returns the received init.
    async fn broker(mut stream: DuplexStream, mechanisms: &[&str], code: SaslCode) -> Option<SaslInit> {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header, SASL_HEADER);
        stream.write_all(&SASL_HEADER).await.unwrap();

        let offered = SaslMechanisms {
            sasl_server_mechanisms: Array(mechanisms.iter().map(|m| Symbol::from(*m)).collect()),
        };
        write_performative(&mut stream, &offered).await;

        let init: SaslInit = match read_performative(&mut stream).await {
            Ok(init) => init,
            Err(_) => return None,
        };
        write_performative(
            &mut stream,
            &SaslOutcome {
                code,
                additional_data: None,
            },
        )
        .await;
        Some(init)
    }

    #[tokio::test]
    async fn test_external_with_common_name() {
        let (mut client, server) = duplex(4096);
        let broker = tokio::spawn(broker(server, &["PLAIN", "EXTERNAL"], SaslCode::Ok));

        authenticate_external(&mut client, "broker.example", Some("actor-42"))
            .await
            .unwrap();

        let init = broker.await.unwrap().unwrap();
        assert_eq!(init.mechanism.0, EXTERNAL);
        assert_eq!(
            init.initial_response.map(|r| r.to_vec()),
            Some(b"actor-42".to_vec())
        );
        assert_eq!(init.hostname.as_deref(), Some("broker.example"));
    }

    #[tokio::test]
    async fn test_external_with_empty_response() {
        let (mut client, server) = duplex(4096);
        let broker = tokio::spawn(broker(server, &["EXTERNAL"], SaslCode::Ok));

        authenticate_external(&mut client, "h", None).await.unwrap();

        let init = broker.await.unwrap().unwrap();
        assert_eq!(init.initial_response.map(|r| r.len()), Some(0));
    }

    #[tokio::test]
    async fn test_rejected_outcome() {
        let (mut client, server) = duplex(4096);
        tokio::spawn(broker(server, &["EXTERNAL"], SaslCode::Auth));

        let err = authenticate_external(&mut client, "h", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Transport(reason) if reason.contains("rejected")));
    }

    #[tokio::test]
    async fn test_external_not_offered() {
        let (mut client, server) = duplex(4096);
        tokio::spawn(broker(server, &["ANONYMOUS"], SaslCode::Ok));

        let err = authenticate_external(&mut client, "h", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Transport(reason) if reason.contains("not offered")));
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(&[0xaa, 0xbb]);
        assert_eq!(frame, vec![0, 0, 0, 10, 2, 1, 0, 0, 0xaa, 0xbb]);
        assert_eq!(frame_body(&frame[4..]).unwrap(), &[0xaa, 0xbb]);
    }

    #[test]
    fn test_frame_body_rejects_amqp_frames() {
        assert!(frame_body(&[2, 0, 0, 0, 1]).is_err());
        assert!(frame_body(&[1, 1, 0, 0]).is_err());
    }
}
