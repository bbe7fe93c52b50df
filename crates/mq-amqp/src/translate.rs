//! Field-by-field translation between `mq_contracts` value types and the
//! AMQP wire representation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lapin::message::Delivery as AmqpDelivery;
use lapin::protocol::basic::AMQPProperties;
use lapin::types::{AMQPValue, FieldTable, LongLongUInt, ShortString};
use lapin::BasicProperties;

use mq_contracts::{Delivery, Dispatch};

/// Decimal-ASCII round-trip for the `u64` identifiers AMQP carries as
/// strings (`AppId`/`MessageId`/`CorrelationId`). Parse failure yields 0.
pub fn parse_decimal_u64(s: Option<&ShortString>) -> u64 {
    s.and_then(|s| s.as_str().parse::<u64>().ok()).unwrap_or(0)
}

pub fn to_decimal(id: u64) -> ShortString {
    id.to_string().into()
}

fn json_headers_to_field_table(headers: &HashMap<String, serde_json::Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (k, v) in headers {
        table.insert(k.as_str().into(), json_to_amqp_value(v));
    }
    table
}

fn json_to_amqp_value(value: &serde_json::Value) -> AMQPValue {
    match value {
        serde_json::Value::Null => AMQPValue::Void,
        serde_json::Value::Bool(b) => AMQPValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AMQPValue::LongLongInt(i)
            } else if let Some(f) = n.as_f64() {
                AMQPValue::Double(f)
            } else {
                AMQPValue::Void
            }
        }
        serde_json::Value::String(s) => AMQPValue::LongString(s.as_str().into()),
        other => AMQPValue::LongString(other.to_string().into()),
    }
}

fn field_table_to_json_headers(table: &FieldTable) -> HashMap<String, serde_json::Value> {
    table
        .inner()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), amqp_value_to_json(v)))
        .collect()
}

fn amqp_value_to_json(value: &AMQPValue) -> serde_json::Value {
    match value {
        AMQPValue::Boolean(b) => serde_json::Value::Bool(*b),
        AMQPValue::LongLongInt(i) => serde_json::Value::from(*i),
        AMQPValue::LongInt(i) => serde_json::Value::from(*i),
        AMQPValue::ShortInt(i) => serde_json::Value::from(*i),
        AMQPValue::Double(f) => serde_json::Value::from(*f),
        AMQPValue::Float(f) => serde_json::Value::from(*f),
        AMQPValue::LongString(s) => serde_json::Value::String(s.as_str().to_string()),
        AMQPValue::ShortString(s) => serde_json::Value::String(s.as_str().to_string()),
        _ => serde_json::Value::Null,
    }
}

/// AMQP `Delivery` → `mq_contracts::Delivery`.
pub fn delivery_from_amqp(raw: &AmqpDelivery) -> Delivery {
    let props: &AMQPProperties = &raw.properties;

    let timestamp = props.timestamp().and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single());

    Delivery {
        delivery_id: raw.delivery_tag,
        source_id: parse_decimal_u64(props.app_id().as_ref()),
        message_id: parse_decimal_u64(props.message_id().as_ref()),
        correlation_id: parse_decimal_u64(props.correlation_id().as_ref()),
        timestamp,
        durable: props.delivery_mode() == Some(2),
        message_type: props.kind().as_ref().map(|s| s.as_str().to_string()).unwrap_or_default(),
        content_type: props.content_type().as_ref().map(|s| s.as_str().to_string()).unwrap_or_default(),
        content_encoding: props.content_encoding().as_ref().map(|s| s.as_str().to_string()).unwrap_or_default(),
        payload: raw.data.clone(),
        headers: props.headers().as_ref().map(field_table_to_json_headers).unwrap_or_default(),
    }
}

/// `mq_contracts::Dispatch` → AMQP `BasicProperties`.
pub fn dispatch_to_properties(dispatch: &Dispatch, now: DateTime<Utc>) -> BasicProperties {
    let timestamp = dispatch.timestamp.unwrap_or(now).timestamp() as LongLongUInt;

    let mut props = BasicProperties::default()
        .with_app_id(to_decimal(dispatch.source_id))
        .with_message_id(to_decimal(dispatch.message_id))
        .with_correlation_id(to_decimal(dispatch.correlation_id))
        .with_kind(dispatch.message_type.as_str().into())
        .with_content_type(dispatch.content_type.as_str().into())
        .with_content_encoding(dispatch.content_encoding.as_str().into())
        .with_headers(json_headers_to_field_table(&dispatch.headers))
        .with_timestamp(timestamp)
        .with_delivery_mode(if dispatch.durable { 2 } else { 1 });

    if let Some(expiration) = expiration_string(dispatch.expiration) {
        props = props.with_expiration(expiration.as_str().into());
    }

    props
}

/// `Expiration` string: empty when zero, `"1"` for sub-second durations,
/// floored whole seconds otherwise.
fn expiration_string(expiration: Option<Duration>) -> Option<String> {
    match expiration {
        None => None,
        Some(d) if d.is_zero() => None,
        Some(d) if d < Duration::from_secs(1) => Some("1".to_string()),
        Some(d) => Some(d.as_secs().to_string()),
    }
}
