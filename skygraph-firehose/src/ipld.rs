use ipld_core::ipld::Ipld;

#[derive(Debug, thiserror::Error)]
pub enum IpldError {
    #[error("invalid DAG-CBOR block: {0}")]
    Decode(String),
    #[error("block not representable as JSON: {0}")]
    Encode(String),
}

/// Decode a DAG-CBOR block into JSON by transcoding through DAG-JSON, so the
/// result can be fed through `$type`-tagged serde unions. Links keep their
/// DAG-JSON `{"/": <cid>}` form; every record field the projection reads is
/// a plain string.
pub fn json_from_block(block: &[u8]) -> Result<serde_json::Value, IpldError> {
    let ipld: Ipld =
        serde_ipld_dagcbor::from_slice(block).map_err(|e| IpldError::Decode(e.to_string()))?;
    let encoded =
        serde_ipld_dagjson::to_vec(&ipld).map_err(|e| IpldError::Encode(e.to_string()))?;
    serde_json::from_slice(&encoded).map_err(|e| IpldError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipld_core::cid::Cid;
    use ipld_core::ipld::Ipld;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    #[test]
    fn block_decodes_to_typed_json() {
        let block = serde_ipld_dagcbor::to_vec(&serde_json::json!({
            "$type": "app.bsky.graph.follow",
            "createdAt": "2024-05-01T12:00:00Z",
            "subject": "did:plc:bob"
        }))
        .unwrap();
        let json = json_from_block(&block).unwrap();
        assert_eq!(json["$type"], "app.bsky.graph.follow");
        assert_eq!(json["subject"], "did:plc:bob");
    }

    #[test]
    fn links_keep_their_dag_json_form() {
        let cid = Cid::from_str("bafyreidfayvfuwqa7qlnopdjiqrxzs6blmoeu4rujcjtnci5beludirz2a")
            .unwrap();
        let mut map = BTreeMap::new();
        map.insert("avatar".to_owned(), Ipld::Link(cid));
        map.insert("text".to_owned(), Ipld::String("hello".into()));
        let block = serde_ipld_dagcbor::to_vec(&Ipld::Map(map)).unwrap();

        let json = json_from_block(&block).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["avatar"]["/"], cid.to_string());
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        assert!(matches!(
            json_from_block(b"\xffnot cbor"),
            Err(IpldError::Decode(_))
        ));
    }
}
