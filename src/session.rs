#[cfg(test)]
use std::io::Cursor;
use std::io::{Read, Write};

use mqtt::control::variable_header::ConnectReturnCode;
use mqtt::packet::publish::QoSWithPacketIdentifier;
use mqtt::packet::suback::SubscribeReturnCode;
use mqtt::packet::{
    ConnectPacket, PubackPacket, PublishPacket,
    SubscribePacket, UnsubscribePacket, VariablePacket,
};
use mqtt::{Decodable, Encodable, QualityOfService, TopicFilter, TopicName};

use crate::config::{ClientConfig, LastWill, QoS};
use crate::error::{ClientError, Result};

/// One decoded inbound MQTT control packet, surfaced to the lifecycle
/// controller's event loop (§3, §4.2). Only the packet types this client
/// ever needs to react to are represented; anything else is dropped with a
/// protocol error (per §9, strict about unexpected traffic).
pub enum InboundEvent {
    ConnAck {
        session_present: bool,
        return_code: ConnectReturnCode,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        packet_id: Option<u16>,
    },
    PubAck {
        packet_id: u16,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<SubscribeReturnCode>,
    },
    UnsubAck {
        packet_id: u16,
    },
    PingResp,
}

fn qos_of(qos: QoSWithPacketIdentifier) -> (QoS, Option<u16>) {
    match qos {
        QoSWithPacketIdentifier::Level0 => (QoS::AtMostOnce, None),
        QoSWithPacketIdentifier::Level1(id) => (QoS::AtLeastOnce, Some(id)),
        QoSWithPacketIdentifier::Level2(id) => (QoS::AtLeastOnce, Some(id)),
    }
}

fn to_qos_with_id(qos: QoS, packet_id: u16) -> QoSWithPacketIdentifier {
    match qos {
        QoS::AtMostOnce => QoSWithPacketIdentifier::Level0,
        QoS::AtLeastOnce => QoSWithPacketIdentifier::Level1(packet_id),
    }
}

/// Builds and writes the CONNECT packet, including last-will wiring and the
/// metrics-suffixed username (§2.2 addendum, §6). A thin wrapper around the
/// `mqtt-protocol` crate's builder API: the wire codec itself is an
/// external collaborator (§1 addendum), this module only owns the session
/// semantics layered on top of it.
pub fn write_connect(
    mut writer: &mut (dyn Write + Send),
    config: &ClientConfig,
    username: &str,
) -> Result<()> {
    let mut packet = ConnectPacket::new(config.client_id.clone());
    packet.set_clean_session(config.clean_session);
    packet.set_keep_alive(config.keep_alive_secs);

    if !username.is_empty() {
        packet.set_user_name(Some(username.to_string()));
    }

    if let Some(LastWill {
        topic,
        payload,
        qos,
        retain,
    }) = &config.last_will
    {
        let topic_name = TopicName::new(topic.clone())
            .map_err(|e| ClientError::Session(format!("invalid will topic: {e:?}")))?;
        packet.set_will(Some((topic_name, payload.clone())));
        packet.set_will_retain(*retain);
        packet.set_will_qos(*qos as u8);
    }

    packet
        .encode(&mut writer)
        .map_err(|e| ClientError::Session(e.to_string()))
}

pub fn write_publish(
    mut writer: &mut (dyn Write + Send),
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: u16,
    retain: bool,
) -> Result<()> {
    let topic_name =
        TopicName::new(topic.to_string()).map_err(|e| ClientError::Session(format!("{e:?}")))?;
    let mut packet = PublishPacket::new(topic_name, to_qos_with_id(qos, packet_id), payload.to_vec());
    packet.set_retain(retain);
    packet
        .encode(&mut writer)
        .map_err(|e| ClientError::Session(e.to_string()))
}

pub fn write_subscribe(
    mut writer: &mut (dyn Write + Send),
    packet_id: u16,
    filters_and_qos: &[(String, QoS)],
) -> Result<()> {
    let subscribes = filters_and_qos
        .iter()
        .map(|(filter, qos)| {
            let topic_filter =
                TopicFilter::new(filter.clone()).map_err(|e| ClientError::Session(format!("{e:?}")))?;
            Ok((
                topic_filter,
                match qos {
                    QoS::AtMostOnce => QualityOfService::Level0,
                    QoS::AtLeastOnce => QualityOfService::Level1,
                },
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let packet = SubscribePacket::new(packet_id, subscribes);
    packet
        .encode(&mut writer)
        .map_err(|e| ClientError::Session(e.to_string()))
}

pub fn write_unsubscribe(mut writer: &mut (dyn Write + Send), packet_id: u16, filters: &[String]) -> Result<()> {
    let topic_filters = filters
        .iter()
        .map(|f| TopicFilter::new(f.clone()).map_err(|e| ClientError::Session(format!("{e:?}"))))
        .collect::<Result<Vec<_>>>()?;

    let packet = UnsubscribePacket::new(packet_id, topic_filters);
    packet
        .encode(&mut writer)
        .map_err(|e| ClientError::Session(e.to_string()))
}

pub fn write_puback(mut writer: &mut (dyn Write + Send), packet_id: u16) -> Result<()> {
    PubackPacket::new(packet_id)
        .encode(&mut writer)
        .map_err(|e| ClientError::Session(e.to_string()))
}

pub fn write_disconnect(mut writer: &mut (dyn Write + Send)) -> Result<()> {
    mqtt::packet::DisconnectPacket::new()
        .encode(&mut writer)
        .map_err(|e| ClientError::Session(e.to_string()))
}

/// Blocks on `reader` until one complete MQTT control packet has arrived,
/// decodes it, and classifies it as an `InboundEvent`. Returns `Ok(None)`
/// on a clean EOF (peer closed the transport) so the caller can fold that
/// into its own disconnect handling rather than treating it as malformed
/// input.
pub fn read_event(mut reader: &mut (dyn Read + Send)) -> Result<Option<InboundEvent>> {
    let packet = match VariablePacket::decode(&mut reader) {
        Ok(packet) => packet,
        Err(mqtt::packet::VariablePacketError::IoError(e))
            if e.kind() == std::io::ErrorKind::UnexpectedEof =>
        {
            return Ok(None)
        }
        Err(mqtt::packet::VariablePacketError::FixedHeaderError(
            mqtt::control::fixed_header::FixedHeaderError::IoError(e),
        )) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None)
        }
        Err(e) => return Err(ClientError::Session(format!("{e:?}"))),
    };

    Ok(Some(match packet {
        VariablePacket::ConnackPacket(p) => InboundEvent::ConnAck {
            session_present: p.connack_flags().session_present,
            return_code: p.connect_return_code(),
        },
        VariablePacket::PublishPacket(p) => {
            let (qos, packet_id) = qos_of(p.qos());
            InboundEvent::Publish {
                topic: p.topic_name().to_string(),
                payload: p.payload().to_vec(),
                qos,
                packet_id,
            }
        }
        VariablePacket::PubackPacket(p) => InboundEvent::PubAck {
            packet_id: p.packet_identifier(),
        },
        VariablePacket::SubackPacket(p) => InboundEvent::SubAck {
            packet_id: p.packet_identifier(),
            return_codes: p.subscribes().to_vec(),
        },
        VariablePacket::UnsubackPacket(p) => InboundEvent::UnsubAck {
            packet_id: p.packet_identifier(),
        },
        VariablePacket::PingrespPacket(_) => InboundEvent::PingResp,
        other => {
            return Err(ClientError::Session(format!(
                "unexpected packet from broker: {other:?}"
            )))
        }
    }))
}
