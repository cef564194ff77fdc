/// Frame classification
///
/// Turns captured frames into typed messages through the codec boundary and
/// applies the per-kind station filter.
use crate::error::CodecError;
use crate::types::{Cam, Denm, MessageKind, StationId, V2xFrame, V2xMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Codec boundary for ITS messages
pub trait MessageCodec: Send + Sync {
    fn decode(&self, frame: &V2xFrame, kind: MessageKind) -> Result<V2xMessage, CodecError>;

    fn encode(&self, msg: &V2xMessage, gn_address: &str) -> Result<V2xFrame, CodecError>;
}

/// Codec carrying message bodies as JSON payloads
///
/// Stands in for an ASN.1 UPER codec on the virtual air bus.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn decode(&self, frame: &V2xFrame, kind: MessageKind) -> Result<V2xMessage, CodecError> {
        let decoded = match kind {
            MessageKind::Cam => serde_json::from_slice::<Cam>(&frame.payload).map(V2xMessage::Cam),
            MessageKind::Denm => {
                serde_json::from_slice::<Denm>(&frame.payload).map(V2xMessage::Denm)
            }
        };
        decoded.map_err(|source| CodecError::Decode { kind, source })
    }

    fn encode(&self, msg: &V2xMessage, gn_address: &str) -> Result<V2xFrame, CodecError> {
        let payload = match msg {
            V2xMessage::Cam(cam) => serde_json::to_vec(cam),
            V2xMessage::Denm(denm) => serde_json::to_vec(denm),
        }
        .map_err(CodecError::Encode)?;

        Ok(V2xFrame::new(
            Some(msg.kind().message_id()),
            gn_address.to_string(),
            payload,
        ))
    }
}

/// Accepted station identifier per message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationFilter {
    pub cam_station: StationId,
    pub denm_station: StationId,
}

impl StationFilter {
    pub fn new(cam_station: StationId, denm_station: StationId) -> Self {
        Self {
            cam_station,
            denm_station,
        }
    }

    pub fn expected(&self, kind: MessageKind) -> StationId {
        match kind {
            MessageKind::Cam => self.cam_station,
            MessageKind::Denm => self.denm_station,
        }
    }

    pub fn accepts(&self, msg: &V2xMessage) -> bool {
        msg.station_id() == self.expected(msg.kind())
    }
}

impl Default for StationFilter {
    fn default() -> Self {
        Self::new(4316, 12131)
    }
}

/// Classifies frames by their ITS header and decodes recognized ones
#[derive(Clone)]
pub struct MessageClassifier {
    codec: Arc<dyn MessageCodec>,
}

impl MessageClassifier {
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self { codec }
    }

    /// `Ok(None)` for frames that are not CAM or DENM
    pub fn classify(&self, frame: &V2xFrame) -> Result<Option<V2xMessage>, CodecError> {
        let Some(kind) = frame.message_id.and_then(MessageKind::from_message_id) else {
            return Ok(None);
        };

        let msg = self.codec.decode(frame, kind)?;
        if msg.kind() != kind {
            return Err(CodecError::KindMismatch {
                expected: kind,
                found: msg.kind(),
            });
        }
        Ok(Some(msg))
    }

    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }
}
