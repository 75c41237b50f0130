//! Call-control documents returned to the telephony provider

/// Escape text for an XML attribute or element
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Answer document: connect the call to the bidirectional media stream,
/// carrying the provider call id as a stream parameter
pub fn connect_stream(stream_url: &str, call_sid: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<Response><Connect><Stream url="{}" name="voice_ai_stream">"#,
            r#"<Parameter name="call_sid" value="{}"/>"#,
            r#"</Stream></Connect></Response>"#
        ),
        escape_xml(stream_url),
        escape_xml(call_sid)
    )
}

/// Warm transfer: short notice to the lead, then bridge to the closer
pub fn warm_transfer(target: &str) -> String {
    format!(
        concat!(
            r#"<Response><Say language="pt-BR">Vou te transferir para nossa consultora. Um momento.</Say>"#,
            r#"<Dial>{}</Dial></Response>"#
        ),
        escape_xml(target)
    )
}
