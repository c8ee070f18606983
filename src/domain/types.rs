// ==========================================
// 水资源风险监测平台 - 领域类型定义
// ==========================================
// 职责: 导入格式、业务模块、标量类型三组封闭枚举
// 约束: 对外字符串形式与任务描述中的 format_type / module_name 一致
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 导入格式 (Format Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormatType {
    #[serde(rename = "csv", alias = "tabular")]
    Tabular, // 分隔文本 / Excel
    #[serde(rename = "json", alias = "nested-document")]
    NestedDocument, // 嵌套 JSON 文档
    #[serde(rename = "geojson", alias = "geo-document")]
    GeoDocument,
    #[serde(rename = "api", alias = "remote-api")]
    RemoteApi, // 远程 REST API
    #[serde(rename = "satellite", alias = "imagery")]
    Imagery, // 卫星遥感影像
    #[serde(rename = "sensor", alias = "device-stream")]
    DeviceStream, // 传感器设备流
    #[serde(rename = "weather", alias = "forecast-feed")]
    ForecastFeed, // 气象预报
    #[serde(rename = "gis", alias = "vector-gis")]
    VectorGis, // 矢量 GIS 文件
}

impl FormatType {
    /// 全部格式（固定顺序，用于对外枚举）
    pub const ALL: [FormatType; 8] = [
        FormatType::Tabular,
        FormatType::NestedDocument,
        FormatType::GeoDocument,
        FormatType::RemoteApi,
        FormatType::Imagery,
        FormatType::DeviceStream,
        FormatType::ForecastFeed,
        FormatType::VectorGis,
    ];

    /// 任务描述中使用的短名称
    pub fn wire_name(&self) -> &'static str {
        match self {
            FormatType::Tabular => "csv",
            FormatType::NestedDocument => "json",
            FormatType::GeoDocument => "geojson",
            FormatType::RemoteApi => "api",
            FormatType::Imagery => "satellite",
            FormatType::DeviceStream => "sensor",
            FormatType::ForecastFeed => "weather",
            FormatType::VectorGis => "gis",
        }
    }

    /// 规范名称（kebab-case）
    pub fn canonical_name(&self) -> &'static str {
        match self {
            FormatType::Tabular => "tabular",
            FormatType::NestedDocument => "nested-document",
            FormatType::GeoDocument => "geo-document",
            FormatType::RemoteApi => "remote-api",
            FormatType::Imagery => "imagery",
            FormatType::DeviceStream => "device-stream",
            FormatType::ForecastFeed => "forecast-feed",
            FormatType::VectorGis => "vector-gis",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

impl FromStr for FormatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        FormatType::ALL
            .iter()
            .copied()
            .find(|f| f.wire_name() == normalized || f.canonical_name() == normalized)
            .ok_or_else(|| s.to_string())
    }
}

// ==========================================
// 业务模块 (Module Name)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleName {
    IotWaterConsumption,
    EnvironmentalHealth,
    UrbanGreenSpace,
    UrbanWaterNetwork,
    AgriculturalReservoir,
    DataCenterWater,
    DrinkingWaterQuality,
    DroughtPrediction,
    DustStormAnalysis,
    GroundwaterPollution,
    InsarSubsidence,
    TransboundaryWater,
    UrbanFloodModeling,
}

impl ModuleName {
    pub const ALL: [ModuleName; 13] = [
        ModuleName::IotWaterConsumption,
        ModuleName::EnvironmentalHealth,
        ModuleName::UrbanGreenSpace,
        ModuleName::UrbanWaterNetwork,
        ModuleName::AgriculturalReservoir,
        ModuleName::DataCenterWater,
        ModuleName::DrinkingWaterQuality,
        ModuleName::DroughtPrediction,
        ModuleName::DustStormAnalysis,
        ModuleName::GroundwaterPollution,
        ModuleName::InsarSubsidence,
        ModuleName::TransboundaryWater,
        ModuleName::UrbanFloodModeling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleName::IotWaterConsumption => "iot_water_consumption",
            ModuleName::EnvironmentalHealth => "environmental_health",
            ModuleName::UrbanGreenSpace => "urban_green_space",
            ModuleName::UrbanWaterNetwork => "urban_water_network",
            ModuleName::AgriculturalReservoir => "agricultural_reservoir",
            ModuleName::DataCenterWater => "data_center_water",
            ModuleName::DrinkingWaterQuality => "drinking_water_quality",
            ModuleName::DroughtPrediction => "drought_prediction",
            ModuleName::DustStormAnalysis => "dust_storm_analysis",
            ModuleName::GroundwaterPollution => "groundwater_pollution",
            ModuleName::InsarSubsidence => "insar_subsidence",
            ModuleName::TransboundaryWater => "transboundary_water",
            ModuleName::UrbanFloodModeling => "urban_flood_modeling",
        }
    }

    /// 模块数据是否通常带有经纬度
    pub fn is_spatial(&self) -> bool {
        !matches!(
            self,
            ModuleName::IotWaterConsumption
                | ModuleName::UrbanWaterNetwork
                | ModuleName::DataCenterWater
        )
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModuleName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ModuleName::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| s.to_string())
    }
}

// ==========================================
// 标量类型 (校验规则声明用)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Numeric,
    Text,
    Boolean,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarType::Numeric => "numeric",
            ScalarType::Text => "string",
            ScalarType::Boolean => "boolean",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" | "number" | "float" | "int" | "integer" => Ok(ScalarType::Numeric),
            "string" | "text" | "str" => Ok(ScalarType::Text),
            "boolean" | "bool" => Ok(ScalarType::Boolean),
            _ => Err(s.to_string()),
        }
    }
}
