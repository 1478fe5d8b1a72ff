//! 端到端测试：配置文件 → 内存总线 → 解码 → 历史库 / 事件

use std::sync::Arc;
use std::time::Duration;

use vibra_sdk::prelude::*;
use vibra_sdk::protocol::encode_binary;

const CATALOG: &str = r#"
[[projects]]
name = "Plant-1"
channel_count = "DAQ8CH"

[[projects.models]]
name = "Compressor"
tag_name = "plant1/compressor"

[[projects.models.channels]]
channel_name = "Bearing 1X"
unit = "um"
correction_value = 1.0
gain = 1.0
sensitivity = 1.0
"#;

fn structured(frame_index: u32, channels: usize) -> Vec<u8> {
    let values: Vec<String> = (0..channels)
        .map(|c| format!("[{c}.0, {c}.5]"))
        .collect();
    format!(
        r#"{{"values": [{}], "frame_index": {frame_index}, "sample_rate": 2560, "tacho_channels": 0}}"#,
        values.join(", ")
    )
    .into_bytes()
}

#[test]
fn test_catalog_driven_pipeline() {
    let catalog = ProjectCatalog::from_toml_str(CATALOG).unwrap();
    catalog.validate().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonLinesHistoryStore::new(dir.path()).with_catalog(catalog.clone()));
    let (bus, handle) = MockBus::new();

    let ingestor = IngestorBuilder::new(Arc::new(catalog), "Plant-1")
        .config(PipelineConfig {
            batch_interval_ms: 10,
            poll_timeout_ms: 2,
            ..PipelineConfig::default()
        })
        .history_store(store.clone())
        .bus(bus)
        .build()
        .unwrap();
    let events = ingestor.subscribe(1024);
    assert!(handle.wait_for_subscription("plant1/compressor", Duration::from_secs(3)));

    ingestor.start_saving("Compressor", "data3");
    // 结构化载荷省略 main_channels，使用项目配置的 8 通道
    assert!(handle.publish("plant1/compressor", structured(1, 8)));
    // 二进制载荷
    let main: Vec<Vec<u16>> = (0..8).map(|c| vec![c as u16; 4]).collect();
    let binary = encode_binary(2, 1000, &main, &[]).unwrap();
    assert!(handle.publish("plant1/compressor", binary));

    assert!(ingestor.wait_for_messages(handle.published() as u64, Duration::from_secs(3)));
    assert_eq!(ingestor.metrics().frames_decoded, 2);
    ingestor.shutdown();

    let records = store.read_records("Plant-1", "Compressor", "data3").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].number_of_channels, 8);
    assert_eq!(records[0].message.len(), 8 * 2);
    assert_eq!(records[1].message.len(), 8 * 4);

    let mut per_feature = std::collections::HashMap::new();
    for event in events.try_iter() {
        if let PipelineEvent::Data(event) = event {
            *per_feature.entry(event.feature).or_insert(0usize) += 1;
        }
    }
    assert_eq!(per_feature.get("Tabular View"), Some(&2));
    assert_eq!(per_feature.get("FFT"), Some(&16));
    // 每帧都包含全部主通道，聚合缓冲每帧凑齐一次
    assert_eq!(per_feature.get("Multiple Trend View"), Some(&2));
}
