use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use tbsync::event_file::proto::{
    self, hparams_plugin_data, proto_value, summary_value, HParamsPluginData, ProtoValue,
    SessionStartInfo, Summary, SummaryMetadata, SummaryValue, TensorProto,
};
use tbsync::event_file::{
    masked_crc32c, write_record, FrameError, RecordReader, EVENTS_FILE_PREFIX,
};
use tbsync::event_file::decode_event;
use tbsync::{
    first_event_timestamp, is_valid_event_file, DecodeError, DecodedValue, EventFileReader,
    EventFileWriter, FileReadError, HparamValue, SummaryPayload,
};
use tempfile::tempdir;

fn scalar(tag: &str, value: f32) -> Summary {
    Summary {
        value: vec![SummaryValue {
            tag: tag.to_string(),
            value: Some(summary_value::Value::SimpleValue(value)),
            ..Default::default()
        }],
    }
}

fn text(tag: &str, values: &[&str]) -> Summary {
    Summary {
        value: vec![SummaryValue {
            tag: tag.to_string(),
            metadata: Some(SummaryMetadata::for_plugin(proto::PLUGIN_TEXT, Vec::new())),
            value: Some(summary_value::Value::Tensor(TensorProto::string_tensor(
                values.iter().map(|value| value.as_bytes().to_vec()).collect(),
            ))),
            ..Default::default()
        }],
    }
}

fn records(path: &std::path::Path) -> Vec<Result<DecodedValue, DecodeError>> {
    EventFileReader::open(path).unwrap().values().collect()
}

#[test]
fn writer_names_files_after_hostname() {
    let dir = tempdir().unwrap();
    let writer = EventFileWriter::create(dir.path(), "worker-1.cluster").unwrap();
    let name = writer.path().file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with(EVENTS_FILE_PREFIX));
    assert!(name.ends_with(".worker-1.cluster"));

    let second = EventFileWriter::create(dir.path(), "worker-1.cluster").unwrap();
    assert_ne!(writer.path(), second.path());
}

#[test]
fn round_trips_scalars_and_text() {
    let dir = tempdir().unwrap();
    let mut writer = EventFileWriter::create(dir.path(), "host").unwrap();
    writer.write_summary(scalar("loss", 0.5), 3, 100.0).unwrap();
    writer
        .write_summary(text("notes", &["first", "second"]), 4, 101.0)
        .unwrap();
    writer.flush().unwrap();

    let decoded: Vec<_> = records(writer.path())
        .into_iter()
        .map(|value| match value.unwrap() {
            DecodedValue::Record(record) => record,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].tag, "loss");
    assert_eq!(decoded[0].step, Some(3));
    assert_eq!(decoded[0].wall_time, Some(100.0));
    assert_eq!(decoded[0].payload, SummaryPayload::Numeric(0.5));
    assert_eq!(
        decoded[1].payload,
        SummaryPayload::Text(vec!["first".into(), "second".into()])
    );
}

#[test]
fn images_plugin_tensor_yields_one_record_per_image() {
    let dir = tempdir().unwrap();
    let mut writer = EventFileWriter::create(dir.path(), "host").unwrap();
    let summary = Summary {
        value: vec![SummaryValue {
            tag: "batch".into(),
            metadata: Some(SummaryMetadata::for_plugin(proto::PLUGIN_IMAGES, Vec::new())),
            value: Some(summary_value::Value::Tensor(TensorProto::string_tensor(vec![
                b"2".to_vec(),
                b"2".to_vec(),
                vec![1, 2, 3],
                vec![4, 5, 6],
            ]))),
            ..Default::default()
        }],
    };
    writer.write_summary(summary, 0, 10.0).unwrap();
    writer.flush().unwrap();

    let payloads: Vec<_> = records(writer.path())
        .into_iter()
        .filter_map(|value| match value.unwrap() {
            DecodedValue::Record(record) => Some(record.payload),
            DecodedValue::Hparams(_) => None,
        })
        .collect();
    assert_eq!(
        payloads,
        vec![
            SummaryPayload::Image(vec![1, 2, 3]),
            SummaryPayload::Image(vec![4, 5, 6]),
        ]
    );
}

#[test]
fn decodes_hparams_session_start() {
    let dir = tempdir().unwrap();
    let mut writer = EventFileWriter::create(dir.path(), "host").unwrap();
    let mut hparams = HashMap::new();
    hparams.insert(
        "lr".to_string(),
        ProtoValue {
            kind: Some(proto_value::Kind::NumberValue(0.01)),
        },
    );
    hparams.insert(
        "optimizer".to_string(),
        ProtoValue {
            kind: Some(proto_value::Kind::StringValue("adam".into())),
        },
    );
    let content = prost::Message::encode_to_vec(&HParamsPluginData {
        version: 0,
        data: Some(hparams_plugin_data::Data::SessionStartInfo(SessionStartInfo {
            hparams,
            ..Default::default()
        })),
    });
    let summary = Summary {
        value: vec![SummaryValue {
            tag: proto::HPARAMS_SESSION_START_TAG.into(),
            metadata: Some(SummaryMetadata::for_plugin(proto::PLUGIN_HPARAMS, content)),
            ..Default::default()
        }],
    };
    writer.write_summary(summary, 0, 10.0).unwrap();
    writer.flush().unwrap();

    let values = records(writer.path());
    assert_eq!(values.len(), 1);
    let DecodedValue::Hparams(set) = values.into_iter().next().unwrap().unwrap() else {
        panic!("expected hparams");
    };
    assert_eq!(set.hparams["lr"], HparamValue::Number(0.01));
    assert_eq!(set.hparams["optimizer"], HparamValue::Text("adam".into()));
}

/// Session start info as the hparams plugin lays it out on the wire.
#[derive(Clone, PartialEq, prost::Message)]
struct WireSessionStartInfo {
    #[prost(map = "string, message", tag = "1")]
    hparams: HashMap<String, ProtoValue>,
    #[prost(string, tag = "3")]
    monitor_url: String,
    #[prost(double, tag = "5")]
    start_time_secs: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
struct WirePluginData {
    #[prost(int32, tag = "1")]
    version: i32,
    #[prost(message, optional, tag = "3")]
    session_start_info: Option<WireSessionStartInfo>,
}

#[test]
fn session_start_with_monitor_url_and_start_time_decodes() {
    let mut hparams = HashMap::new();
    hparams.insert(
        "lr".to_string(),
        ProtoValue {
            kind: Some(proto_value::Kind::NumberValue(0.1)),
        },
    );
    let content = prost::Message::encode_to_vec(&WirePluginData {
        version: 0,
        session_start_info: Some(WireSessionStartInfo {
            hparams,
            monitor_url: "http://localhost:6006/monitor".into(),
            start_time_secs: 1_700_000_000.0,
        }),
    });

    let plugin: HParamsPluginData = prost::Message::decode(content.as_slice()).unwrap();
    let Some(hparams_plugin_data::Data::SessionStartInfo(info)) = plugin.data else {
        panic!("expected session start info");
    };
    assert_eq!(info.monitor_url, "http://localhost:6006/monitor");
    assert_eq!(info.start_time_secs, 1_700_000_000.0);

    let event = proto::Event {
        wall_time: 10.0,
        step: 0,
        what: Some(proto::event::What::Summary(Summary {
            value: vec![SummaryValue {
                tag: proto::HPARAMS_SESSION_START_TAG.into(),
                metadata: Some(SummaryMetadata::for_plugin(proto::PLUGIN_HPARAMS, content)),
                ..Default::default()
            }],
        })),
    };
    let values = decode_event(&event);
    assert_eq!(values.len(), 1);
    let DecodedValue::Hparams(set) = values.into_iter().next().unwrap().unwrap() else {
        panic!("expected hparams");
    };
    assert_eq!(set.hparams["lr"], HparamValue::Number(0.1));
}

#[test]
fn corrupt_payload_stops_the_stream() {
    let dir = tempdir().unwrap();
    let mut writer = EventFileWriter::create(dir.path(), "host").unwrap();
    writer.write_summary(scalar("loss", 1.0), 0, 10.0).unwrap();
    writer.write_summary(scalar("loss", 2.0), 1, 11.0).unwrap();
    writer.flush().unwrap();
    let path = writer.path().to_path_buf();
    drop(writer);

    let mut bytes = fs::read(&path).unwrap();
    let target = bytes.len() - 5;
    bytes[target] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    let values = records(&path);
    assert_eq!(values.len(), 2);
    assert!(values[0].is_ok());
    let err = values[1].as_ref().unwrap_err();
    assert!(err.is_stream_error());
    assert!(matches!(
        err,
        DecodeError::Frame(FrameError::PayloadChecksum { .. })
    ));
}

#[test]
fn truncated_tail_reads_as_end_of_file() {
    let mut framed = Vec::new();
    write_record(&mut framed, b"complete").unwrap();
    write_record(&mut framed, b"cut short").unwrap();
    framed.truncate(framed.len() - 3);

    let mut reader = RecordReader::new(Cursor::new(framed));
    assert_eq!(reader.next_record().unwrap(), Some(b"complete".to_vec()));
    assert_eq!(reader.next_record().unwrap(), None);
}

#[test]
fn bad_length_checksum_is_reported() {
    let mut framed = Vec::new();
    write_record(&mut framed, b"payload").unwrap();
    framed[8] ^= 0x01;
    let mut reader = RecordReader::new(Cursor::new(framed));
    assert!(matches!(
        reader.next_record(),
        Err(FrameError::LengthChecksum { offset: 0 })
    ));
}

#[test]
fn masked_crc_matches_tfrecord_framing() {
    let mut framed = Vec::new();
    write_record(&mut framed, b"abc").unwrap();
    let footer = u32::from_le_bytes([framed[15], framed[16], framed[17], framed[18]]);
    assert_eq!(footer, masked_crc32c(b"abc"));
    assert_ne!(masked_crc32c(b"abc"), crc32c::crc32c(b"abc"));
}

#[test]
fn empty_file_has_no_timestamp() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.out.tfevents.0.host");
    fs::write(&path, b"").unwrap();
    assert!(matches!(
        first_event_timestamp(&path),
        Err(FileReadError::NoTimestamp { .. })
    ));
    assert!(!is_valid_event_file(&path));
    assert!(!is_valid_event_file(dir.path().join("missing")));
}

#[test]
fn written_file_is_a_valid_event_file() {
    let dir = tempdir().unwrap();
    let mut writer = EventFileWriter::create(dir.path(), "host").unwrap();
    writer.flush().unwrap();
    let stamp = first_event_timestamp(writer.path()).unwrap();
    assert!(stamp > 0.0);
    assert!(records(writer.path()).is_empty());
}
