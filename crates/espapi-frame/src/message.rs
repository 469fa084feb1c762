//! The kind table: every numeric kind the device speaks, the payload schema
//! that travels under it, and the closed [`Message`] enum that carries one
//! decoded payload.

use std::fmt;

use prost::Message as ProstMessage;

use crate::error::{FrameError, Result};
use crate::proto;

/// A payload schema with a fixed kind on the wire.
///
/// Implemented for every struct in [`crate::proto`], which lets typed request
/// helpers name the reply they expect as a type instead of a kind constant.
pub trait Schema: ProstMessage + Default + Into<Message> {
    /// Kind this schema is sent and received under.
    const KIND: MessageKind;

    /// Unwrap a decoded message if it carries this schema.
    fn from_message(message: Message) -> Option<Self>;
}

macro_rules! message_table {
    ($($id:literal => $name:ident),+ $(,)?) => {
        /// Numeric message kind carried in every frame header.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum MessageKind {
            $($name = $id,)+
        }

        impl MessageKind {
            /// Every kind, in wire id order.
            pub const ALL: &'static [MessageKind] = &[$(MessageKind::$name,)+];

            /// Wire id of this kind.
            pub const fn id(self) -> u32 {
                self as u32
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(MessageKind::$name => stringify!($name),)+
                }
            }
        }

        impl TryFrom<u64> for MessageKind {
            type Error = FrameError;

            fn try_from(id: u64) -> Result<Self> {
                match id {
                    $($id => Ok(MessageKind::$name),)+
                    other => Err(FrameError::UnknownKind(other)),
                }
            }
        }

        /// One decoded payload, tagged by its kind.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($name(proto::$name),)+
        }

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$name(_) => MessageKind::$name,)+
                }
            }

            /// Serialize the payload (without the frame header).
            pub fn encode_payload(&self) -> Vec<u8> {
                match self {
                    $(Message::$name(inner) => inner.encode_to_vec(),)+
                }
            }

            /// Decode a payload received under `kind`.
            pub fn decode_payload(kind: MessageKind, payload: &[u8]) -> Result<Self> {
                let decoded = match kind {
                    $(MessageKind::$name => proto::$name::decode(payload).map(Message::$name),)+
                };
                decoded.map_err(|source| FrameError::Decode { kind, source })
            }

            /// A message of `kind` with every field at its default.
            pub fn empty(kind: MessageKind) -> Self {
                match kind {
                    $(MessageKind::$name => Message::$name(proto::$name::default()),)+
                }
            }
        }

        $(
            impl From<proto::$name> for Message {
                fn from(inner: proto::$name) -> Self {
                    Message::$name(inner)
                }
            }

            impl Schema for proto::$name {
                const KIND: MessageKind = MessageKind::$name;

                fn from_message(message: Message) -> Option<Self> {
                    match message {
                        Message::$name(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )+
    };
}

message_table! {
    1 => HelloRequest,
    2 => HelloResponse,
    3 => ConnectRequest,
    4 => ConnectResponse,
    5 => DisconnectRequest,
    6 => DisconnectResponse,
    7 => PingRequest,
    8 => PingResponse,
    9 => DeviceInfoRequest,
    10 => DeviceInfoResponse,
    11 => ListEntitiesRequest,
    12 => ListEntitiesBinarySensorResponse,
    13 => ListEntitiesCoverResponse,
    14 => ListEntitiesFanResponse,
    15 => ListEntitiesLightResponse,
    16 => ListEntitiesSensorResponse,
    17 => ListEntitiesSwitchResponse,
    18 => ListEntitiesTextSensorResponse,
    19 => ListEntitiesDoneResponse,
    20 => SubscribeStatesRequest,
    21 => BinarySensorStateResponse,
    22 => CoverStateResponse,
    23 => FanStateResponse,
    24 => LightStateResponse,
    25 => SensorStateResponse,
    26 => SwitchStateResponse,
    27 => TextSensorStateResponse,
    28 => SubscribeLogsRequest,
    29 => SubscribeLogsResponse,
    30 => CoverCommandRequest,
    31 => FanCommandRequest,
    32 => LightCommandRequest,
    33 => SwitchCommandRequest,
    34 => SubscribeHomeassistantServicesRequest,
    35 => HomeassistantServiceResponse,
    36 => GetTimeRequest,
    37 => GetTimeResponse,
    38 => SubscribeHomeAssistantStatesRequest,
    39 => SubscribeHomeAssistantStateResponse,
    40 => HomeAssistantStateResponse,
    41 => ListEntitiesServicesResponse,
    42 => ExecuteServiceRequest,
    43 => ListEntitiesCameraResponse,
    44 => CameraImageResponse,
    45 => CameraImageRequest,
    46 => ListEntitiesClimateResponse,
    47 => ClimateStateResponse,
    48 => ClimateCommandRequest,
}

impl MessageKind {
    /// Push-state notifications routed to the entity dispatcher.
    pub const fn is_state_update(self) -> bool {
        matches!(
            self,
            MessageKind::BinarySensorStateResponse
                | MessageKind::CoverStateResponse
                | MessageKind::FanStateResponse
                | MessageKind::LightStateResponse
                | MessageKind::SensorStateResponse
                | MessageKind::SwitchStateResponse
                | MessageKind::TextSensorStateResponse
                | MessageKind::ClimateStateResponse
        )
    }

    /// Entity descriptions sent during enumeration.
    pub const fn is_entity_description(self) -> bool {
        matches!(
            self,
            MessageKind::ListEntitiesBinarySensorResponse
                | MessageKind::ListEntitiesCoverResponse
                | MessageKind::ListEntitiesFanResponse
                | MessageKind::ListEntitiesLightResponse
                | MessageKind::ListEntitiesSensorResponse
                | MessageKind::ListEntitiesSwitchResponse
                | MessageKind::ListEntitiesTextSensorResponse
                | MessageKind::ListEntitiesServicesResponse
                | MessageKind::ListEntitiesCameraResponse
                | MessageKind::ListEntitiesClimateResponse
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}

impl From<MessageKind> for u64 {
    fn from(kind: MessageKind) -> Self {
        u64::from(kind.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_dense_and_ordered() {
        assert_eq!(MessageKind::ALL.len(), 48);
        for (index, kind) in MessageKind::ALL.iter().enumerate() {
            assert_eq!(kind.id() as usize, index + 1);
            assert_eq!(MessageKind::try_from(u64::from(*kind)).unwrap(), *kind);
        }
    }

    #[test]
    fn camera_kinds_match_wire_ids() {
        assert_eq!(MessageKind::CameraImageResponse.id(), 44);
        assert_eq!(MessageKind::CameraImageRequest.id(), 45);
        assert_eq!(MessageKind::ListEntitiesClimateResponse.id(), 46);
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(matches!(
            MessageKind::try_from(0),
            Err(FrameError::UnknownKind(0))
        ));
        assert!(matches!(
            MessageKind::try_from(49),
            Err(FrameError::UnknownKind(49))
        ));
    }

    #[test]
    fn every_kind_decodes_its_own_empty_payload() {
        for kind in MessageKind::ALL {
            let message = Message::empty(*kind);
            assert_eq!(message.kind(), *kind);
            let decoded = Message::decode_payload(*kind, &message.encode_payload()).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn populated_payload_survives_encoding() {
        let message = Message::from(proto::LightStateResponse {
            key: 0xdead_beef,
            state: true,
            brightness: 0.75,
            red: 1.0,
            green: 0.5,
            blue: 0.25,
            white: 0.0,
            color_temperature: 300.0,
            effect: "rainbow".into(),
        });
        let payload = message.encode_payload();
        let decoded = Message::decode_payload(MessageKind::LightStateResponse, &payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let err = Message::decode_payload(MessageKind::HelloResponse, &[0x0a, 0xff]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Decode {
                kind: MessageKind::HelloResponse,
                ..
            }
        ));
        assert!(err.is_protocol());
    }

    #[test]
    fn schema_unwraps_only_its_kind() {
        let hello = Message::from(proto::HelloResponse::default());
        assert_eq!(<proto::HelloResponse as Schema>::KIND, MessageKind::HelloResponse);
        assert!(proto::HelloResponse::from_message(hello.clone()).is_some());
        assert!(proto::ConnectResponse::from_message(hello).is_none());
    }

    #[test]
    fn classifies_state_updates_and_descriptions() {
        assert!(MessageKind::SensorStateResponse.is_state_update());
        assert!(MessageKind::ClimateStateResponse.is_state_update());
        assert!(!MessageKind::CameraImageResponse.is_state_update());
        assert!(MessageKind::ListEntitiesCameraResponse.is_entity_description());
        assert!(!MessageKind::ListEntitiesDoneResponse.is_entity_description());
    }

    #[test]
    fn display_includes_name_and_id() {
        assert_eq!(MessageKind::PingRequest.to_string(), "PingRequest(7)");
    }
}
