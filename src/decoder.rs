//! Decoding of Wibeee payloads into a flat key/value snapshot.
//!
//! The device speaks three shapes depending on firmware and code path:
//! a flat XML element list (`<response><fase1_vrms>..</fase1_vrms>..`),
//! an XML variable list (`<values><variable><id>/<value>..`), and a JSON
//! object on the push endpoints. All three decode to the same
//! insertion-ordered [`Snapshot`].

use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// One point-in-time mapping of measurement keys to raw scalar values.
pub type Snapshot = IndexMap<String, String>;

/// Decodes an XML or JSON payload into a [`Snapshot`].
pub fn decode(text: &str) -> Result<Snapshot> {
    if text.trim_start().starts_with('{') {
        decode_json(text)
    } else {
        decode_xml(text)
    }
}

/// Decodes the two vendor XML shapes.
///
/// Leaf elements directly under the document root become entries keyed by
/// element name; `<variable>` children become entries keyed by their
/// `<id>` with their `<value>` text. End-tag name checking is relaxed, the
/// device firmware occasionally emits slightly broken markup.
pub fn decode_xml(text: &str) -> Result<Snapshot> {
    let mut reader = Reader::from_str(text);
    let config = reader.config_mut();
    config.trim_text_start = true;
    config.trim_text_end = true;
    config.check_end_names = false;

    let mut out = Snapshot::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text_buf = String::new();
    let mut var_id: Option<String> = None;
    let mut var_value: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                text_buf.clear();
            }
            Ok(Event::Empty(e)) => {
                if stack.len() == 1 {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    out.insert(name, String::new());
                }
            }
            Ok(Event::Text(t)) => {
                text_buf = t
                    .unescape()
                    .map(|cow| cow.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
            }
            Ok(Event::CData(t)) => {
                text_buf = String::from_utf8_lossy(t.as_ref()).into_owned();
            }
            Ok(Event::End(_)) => {
                let name = stack.pop().unwrap_or_default();
                match stack.len() {
                    // Closed an element directly under the root.
                    1 => {
                        if name == "variable" {
                            if let (Some(id), Some(value)) = (var_id.take(), var_value.take()) {
                                out.insert(id, value);
                            }
                        } else {
                            out.insert(name, std::mem::take(&mut text_buf));
                        }
                    }
                    // Closed a child of a <variable> element.
                    2 => match name.as_str() {
                        "id" => var_id = Some(std::mem::take(&mut text_buf)),
                        "value" => var_value = Some(std::mem::take(&mut text_buf)),
                        _ => {}
                    },
                    _ => {}
                }
                text_buf.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(BridgeError::parse(err, text)),
        }
    }

    if out.is_empty() {
        return Err(BridgeError::parse("no elements found", text));
    }
    Ok(out)
}

/// Decodes a JSON object payload, repairing known firmware bugs.
///
/// Some firmware versions emit doubled commas and missing quotes. On a
/// parse failure a small fixed set of textual substitutions is tried, in
/// order, each followed by a single re-parse. If nothing parses the
/// failure is reported against the original text, not the repaired one.
pub fn decode_json(text: &str) -> Result<Snapshot> {
    let first_error = match parse_json_object(text) {
        Ok(fields) => return Ok(fields),
        Err(err) => err,
    };

    let doubled_commas = text.replace(",,", ",");
    let missing_quotes = doubled_commas.replace("\"\"", "\",\"");
    for repaired in [doubled_commas, missing_quotes] {
        if repaired == text {
            continue;
        }
        if let Ok(fields) = parse_json_object(&repaired) {
            debug!(error = %first_error, "repaired invalid JSON push data");
            return Ok(fields);
        }
    }

    Err(BridgeError::parse(first_error, text))
}

fn parse_json_object(text: &str) -> std::result::Result<Snapshot, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let object = value.as_object().ok_or("payload is not a JSON object")?;
    Ok(object
        .iter()
        .map(|(key, value)| (key.clone(), scalar_to_string(value)))
        .collect())
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_flat_status_xml() {
        let fields = decode(
            "<response>\
             <fase1_vrms>230.1</fase1_vrms>\
             <fase1_irms>1.5</fase1_irms>\
             <fase4_vrms>0.3</fase4_vrms>\
             </response>",
        )
        .unwrap();

        assert_eq!(fields["fase1_vrms"], "230.1");
        assert_eq!(fields["fase1_irms"], "1.5");
        assert_eq!(fields["fase4_vrms"], "0.3");
        let keys: Vec<&String> = fields.keys().collect();
        assert_eq!(keys, ["fase1_vrms", "fase1_irms", "fase4_vrms"]);
    }

    #[test]
    fn test_decode_devices_xml() {
        let fields = decode("<devices><id>WIBEEE</id></devices>").unwrap();
        assert_eq!(fields["id"], "WIBEEE");
    }

    #[test]
    fn test_decode_variable_list_xml() {
        let fields = decode(
            "<values>\
             <variable><id>macAddr</id><value>11:11:11:11:11:11</value></variable>\
             <variable><id>softVersion</id><value>4.4.124</value></variable>\
             <variable><id>vrms2</id><value>235.06</value></variable>\
             </values>",
        )
        .unwrap();

        assert_eq!(fields["macAddr"], "11:11:11:11:11:11");
        assert_eq!(fields["softVersion"], "4.4.124");
        assert_eq!(fields["vrms2"], "235.06");
        let keys: Vec<&String> = fields.keys().collect();
        assert_eq!(keys, ["macAddr", "softVersion", "vrms2"]);
    }

    #[test]
    fn test_decode_xml_with_declaration_and_empty_element() {
        let fields = decode(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <response><fase1_vrms>230.1</fase1_vrms><fase1_irms/></response>",
        )
        .unwrap();
        assert_eq!(fields["fase1_vrms"], "230.1");
        assert_eq!(fields["fase1_irms"], "");
    }

    #[test]
    fn test_decode_empty_xml_is_a_parse_failure() {
        assert!(matches!(
            decode("   "),
            Err(BridgeError::Parse { .. })
        ));
    }

    #[test]
    fn test_decode_well_formed_json() {
        let fields = decode(r#"{"mac":"AABBCCDDEEFF","v1":"235.06","p1":152}"#).unwrap();
        assert_eq!(fields["mac"], "AABBCCDDEEFF");
        assert_eq!(fields["v1"], "235.06");
        assert_eq!(fields["p1"], "152");
        let keys: Vec<&String> = fields.keys().collect();
        assert_eq!(keys, ["mac", "v1", "p1"]);
    }

    #[test]
    fn test_decode_json_repairs_doubled_comma() {
        // Device firmware bug: doubled comma. The repaired payload must
        // keep the empty ssid value intact.
        let fields = decode_json(r#"{"mac":"AA","v1":"235.0",,"ssid":""}"#).unwrap();
        assert_eq!(fields["mac"], "AA");
        assert_eq!(fields["v1"], "235.0");
        assert_eq!(fields["ssid"], "");
    }

    #[test]
    fn test_decode_json_repairs_missing_quotes() {
        // Missing comma between two string values renders as `""`.
        let fields = decode_json(r#"{"mac":"AA""v1":"235.0"}"#).unwrap();
        assert_eq!(fields["mac"], "AA");
        assert_eq!(fields["v1"], "235.0");
    }

    #[test]
    fn test_decode_json_unrepairable_reports_original_text() {
        let text = r#"{"mac":"AA",,"v1":"#;
        match decode_json(text) {
            Err(BridgeError::Parse { text: reported, .. }) => assert_eq!(reported, text),
            other => panic!("expected parse failure, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_json_array_is_a_parse_failure() {
        assert!(decode_json(r#"["a","b"]"#).is_err());
    }
}
