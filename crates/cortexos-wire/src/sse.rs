use cortexos_types::StreamEvent;

/// Encodes a `StreamEvent` as an SSE frame (spec.md §6):
/// `event: <type>\nid: <seq>\ndata: <json>\n\n`.
pub fn encode_sse(event: &StreamEvent) -> String {
    let payload = serde_json::json!({
        "stage": event.stage,
        "data": event.data,
        "timestamp": event.timestamp,
    });
    format!(
        "event: {}\nid: {}\ndata: {}\n\n",
        event.event_type.wire_name(),
        event.sequence,
        payload
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cortexos_types::StreamEventType;

    #[test]
    fn encodes_expected_frame_shape() {
        let event = StreamEvent {
            event_type: StreamEventType::Heartbeat,
            stage: None,
            data: serde_json::json!({}),
            timestamp: Utc::now(),
            sequence: 7,
        };
        let frame = encode_sse(&event);
        assert!(frame.starts_with("event: heartbeat\nid: 7\ndata: "));
        assert!(frame.ends_with("\n\n"));
    }
}
