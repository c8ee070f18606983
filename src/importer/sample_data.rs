// ==========================================
// 水资源风险监测平台 - 样例数据生成
// ==========================================
// 职责: 按业务模块生成形状合理的随机记录，用于联调与演示
// 说明: 生成的记录走完整的执行器流程（映射/清洗/校验/写入）
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::types::ModuleName;
use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;

/// 样例任务的数据源标识
pub const SAMPLE_DATA_SOURCE: &str = "sample_data";

const GREEN_SPACE_TYPES: &[&str] = &[
    "park",
    "garden",
    "forest",
    "wetland",
    "community_garden",
    "rooftop_garden",
];

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn put<R: Rng + ?Sized>(record: &mut RawRecord, rng: &mut R, field: &str, low: f64, high: f64) {
    record.insert(field.to_string(), Value::from(round2(rng.gen_range(low..high))));
}

/// 生成 `count` 条模块样例记录（时间戳按小时递减）
pub fn generate_records<R: Rng + ?Sized>(module: ModuleName, count: usize, rng: &mut R) -> Vec<RawRecord> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let mut record = RawRecord::new();
            let ts = now - Duration::hours(i as i64);
            record.insert("timestamp".to_string(), Value::from(ts.to_rfc3339()));
            fill_module_fields(module, i, &mut record, rng);
            record
        })
        .collect()
}

fn fill_module_fields<R: Rng + ?Sized>(module: ModuleName, i: usize, record: &mut RawRecord, rng: &mut R) {
    match module {
        ModuleName::IotWaterConsumption => {
            record.insert("device_id".to_string(), Value::from(format!("iot_{:03}", i % 50 + 1)));
            put(record, rng, "consumption", 600.0, 1400.0);
            record.insert("unit".to_string(), Value::from("liters"));
        }
        ModuleName::EnvironmentalHealth => {
            record.insert("location_id".to_string(), Value::from(format!("env_{:03}", i + 1)));
            put(record, rng, "lat", 25.0, 50.0);
            put(record, rng, "lng", -120.0, -70.0);
            put(record, rng, "pm25", 5.0, 35.0);
            put(record, rng, "pm10", 10.0, 80.0);
            put(record, rng, "ozone", 20.0, 120.0);
            put(record, rng, "no2", 5.0, 60.0);
            put(record, rng, "lead", 0.0, 50.0);
            put(record, rng, "arsenic", 0.0, 30.0);
        }
        ModuleName::UrbanGreenSpace => {
            let kind = GREEN_SPACE_TYPES.choose(rng).copied().unwrap_or("park");
            record.insert("green_space_type".to_string(), Value::from(kind));
            put(record, rng, "lat", 25.0, 50.0);
            put(record, rng, "lng", -120.0, -70.0);
            put(record, rng, "area", 5.0, 50.0);
            put(record, rng, "vegetation_density", 0.4, 0.9);
            put(record, rng, "tree_coverage", 0.3, 0.8);
            record.insert("species_richness".to_string(), Value::from(rng.gen_range(20..100)));
        }
        ModuleName::UrbanWaterNetwork => {
            record.insert("network_id".to_string(), Value::from(format!("net_{:03}", i % 20 + 1)));
            put(record, rng, "pressure", 30.0, 70.0);
            put(record, rng, "flow_rate", 60.0, 140.0);
            put(record, rng, "turbidity", 0.0, 4.0);
            put(record, rng, "chlorine", 0.5, 2.5);
            put(record, rng, "ph", 6.6, 7.8);
        }
        _ => {
            record.insert("station_id".to_string(), Value::from(format!("{}_{:03}", module, i + 1)));
            if module.is_spatial() {
                put(record, rng, "lat", 25.0, 50.0);
                put(record, rng, "lng", -120.0, -70.0);
            }
            put(record, rng, "value", 0.0, 100.0);
            put(record, rng, "quality_score", 0.6, 0.95);
        }
    }
}
