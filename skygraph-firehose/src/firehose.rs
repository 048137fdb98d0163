use serde::Deserialize;
use skygraph_lexicon::com::atproto::sync::SubscribeRepos;
use std::io::Cursor;

/// Envelope header preceding every subscribeRepos frame. Error frames carry
/// `op = -1` and no type tag.
#[derive(Debug, Deserialize)]
pub struct Header {
    #[serde(rename = "t", default)]
    pub type_: Option<String>,
    #[serde(rename = "op")]
    pub operation: i8,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The relay sent an explicit error frame; the subscription is over.
    #[error("error frame from relay: {error} ({message:?})")]
    ErrorFrame {
        error: String,
        message: Option<String>,
    },
    #[error("invalid frame header: {0}")]
    Header(#[from] ciborium::de::Error<std::io::Error>),
    #[error("invalid frame body: {0}")]
    Body(#[from] serde_ipld_dagcbor::DecodeError<std::io::Error>),
    #[error("unknown frame type {0:?}")]
    UnknownType(String),
}

/// Decode one binary WebSocket frame into its typed subscribeRepos message.
/// The envelope is two concatenated CBOR values: a ciborium-decoded header
/// followed by a DAG-CBOR body.
pub fn read(data: &[u8]) -> Result<(Header, SubscribeRepos), FrameError> {
    let mut reader = Cursor::new(data);

    let header = ciborium::de::from_reader::<Header, _>(&mut reader)?;
    if header.operation == -1 {
        let body: ErrorBody = serde_ipld_dagcbor::from_reader(&mut reader)?;
        return Err(FrameError::ErrorFrame {
            error: body.error,
            message: body.message,
        });
    }

    let type_ = header.type_.as_deref().unwrap_or_default();
    let body = match type_ {
        "#commit" => SubscribeRepos::Commit(serde_ipld_dagcbor::from_reader(&mut reader)?),
        "#handle" => SubscribeRepos::Handle(serde_ipld_dagcbor::from_reader(&mut reader)?),
        "#identity" => SubscribeRepos::Identity(serde_ipld_dagcbor::from_reader(&mut reader)?),
        "#account" => SubscribeRepos::Account(serde_ipld_dagcbor::from_reader(&mut reader)?),
        "#tombstone" => SubscribeRepos::Tombstone(serde_ipld_dagcbor::from_reader(&mut reader)?),
        "#info" => SubscribeRepos::Info(serde_ipld_dagcbor::from_reader(&mut reader)?),
        other => return Err(FrameError::UnknownType(other.to_owned())),
    };

    Ok((header, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use skygraph_lexicon::com::atproto::sync::SubscribeReposHandle;

    #[derive(Serialize)]
    struct TestHeader {
        t: &'static str,
        op: i8,
    }

    fn frame<T: Serialize>(t: &'static str, op: i8, body: &T) -> Vec<u8> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&TestHeader { t, op }, &mut bytes).unwrap();
        bytes.extend(serde_ipld_dagcbor::to_vec(body).unwrap());
        bytes
    }

    #[test]
    fn decodes_handle_frame() {
        let body = SubscribeReposHandle {
            did: "did:plc:alice".to_owned(),
            handle: "alice.bsky.social".to_owned(),
            seq: 7,
            time: "2024-05-01T12:00:00Z".parse().unwrap(),
        };
        let bytes = frame("#handle", 1, &body);

        let (header, decoded) = read(&bytes).unwrap();
        assert_eq!(header.type_.as_deref(), Some("#handle"));
        match decoded {
            SubscribeRepos::Handle(h) => {
                assert_eq!(h.did, "did:plc:alice");
                assert_eq!(h.seq, 7);
            }
            other => panic!("expected handle message, got {other:?}"),
        }
    }

    #[test]
    fn error_frame_is_terminal() {
        #[derive(Serialize)]
        struct Err0 {
            error: &'static str,
            message: &'static str,
        }
        #[derive(Serialize)]
        struct ErrHeader {
            op: i8,
        }
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&ErrHeader { op: -1 }, &mut bytes).unwrap();
        bytes.extend(
            serde_ipld_dagcbor::to_vec(&Err0 {
                error: "FutureCursor",
                message: "cursor in the future",
            })
            .unwrap(),
        );

        match read(&bytes) {
            Err(FrameError::ErrorFrame { error, .. }) => assert_eq!(error, "FutureCursor"),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let bytes = frame("#labels", 1, &serde_json::json!({"seq": 1}));
        assert!(matches!(read(&bytes), Err(FrameError::UnknownType(_))));
    }
}
