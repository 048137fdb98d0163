use ipld_core::cid::Cid;
use iroh_car::CarReader;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum CarError {
    #[error("invalid CAR stream: {0}")]
    Decode(String),
    #[error("invalid block CID: {0}")]
    BlockCid(String),
}

/// A decoded CAR: its root CIDs and the cid -> block map.
#[derive(Debug)]
pub struct CarContents {
    pub roots: Vec<Cid>,
    pub blocks: HashMap<Cid, Vec<u8>>,
}

impl CarContents {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Decode a CAR byte string into its roots and block map. Commits ship
/// their block tree this way, as do getRepo snapshots.
pub async fn read_car(data: &[u8]) -> Result<CarContents, CarError> {
    let mut reader = CarReader::new(data)
        .await
        .map_err(|e| CarError::Decode(e.to_string()))?;

    let roots = reader
        .header()
        .roots()
        .iter()
        .map(|root| canonical(root.to_bytes()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut blocks = HashMap::new();
    while let Some((cid, block)) = reader
        .next_block()
        .await
        .map_err(|e| CarError::Decode(e.to_string()))?
    {
        blocks.insert(canonical(cid.to_bytes())?, block);
    }

    Ok(CarContents { roots, blocks })
}

// Re-key on the cid revision the rest of the pipeline uses.
fn canonical(bytes: Vec<u8>) -> Result<Cid, CarError> {
    Cid::try_from(bytes).map_err(|e| CarError::BlockCid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::str::FromStr;

    const CID_A: &str = "bafyreidfayvfuwqa7qlnopdjiqrxzs6blmoeu4rujcjtnci5beludirz2a";
    const CID_B: &str = "bafyreib2rxk3rybk3aobmv5cjuql3bm2twh4jo5uxgf5kpqrsgxcqeei7e";

    #[derive(Serialize)]
    struct TestHeader {
        version: u8,
        roots: Vec<Cid>,
    }

    fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn put_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
        put_uvarint(out, chunk.len() as u64);
        out.extend_from_slice(chunk);
    }

    fn car_with_blocks(blocks: &[(Cid, &[u8])]) -> Vec<u8> {
        let header = TestHeader {
            version: 1,
            roots: vec![blocks[0].0],
        };
        let mut out = Vec::new();
        put_chunk(&mut out, &serde_ipld_dagcbor::to_vec(&header).unwrap());
        for (cid, payload) in blocks {
            let mut chunk = cid.to_bytes();
            chunk.extend_from_slice(payload);
            put_chunk(&mut out, &chunk);
        }
        out
    }

    #[tokio::test]
    async fn reads_roots_and_blocks() {
        let cid_a = Cid::from_str(CID_A).unwrap();
        let cid_b = Cid::from_str(CID_B).unwrap();
        let data = car_with_blocks(&[(cid_a, b"first block"), (cid_b, b"second block")]);

        let car = read_car(&data).await.unwrap();
        assert_eq!(car.roots, vec![cid_a]);
        assert_eq!(car.blocks.len(), 2);
        assert_eq!(car.blocks.get(&cid_a).unwrap(), b"first block");
        assert_eq!(car.blocks.get(&cid_b).unwrap(), b"second block");
        assert!(!car.is_empty());
    }

    #[tokio::test]
    async fn truncated_car_is_an_error() {
        let cid_a = Cid::from_str(CID_A).unwrap();
        let mut data = car_with_blocks(&[(cid_a, b"payload")]);
        data.truncate(data.len() - 3);

        assert!(read_car(&data).await.is_err());
    }

    #[tokio::test]
    async fn garbage_header_is_an_error() {
        assert!(read_car(b"\x05notacar").await.is_err());
    }
}
