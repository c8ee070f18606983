// ==========================================
// 水资源风险监测平台 - 遥感指数
// ==========================================
// 职责: 由波段值计算派生指数（纯函数，可注册扩展）
// 内置: ndvi / ndwi / evi / savi / mndwi
// 约定: 逐像素计算；分母为 0 时按 1 处理；缺少所需波段返回 None
// ==========================================

use std::collections::BTreeMap;

/// 波段名 → 波段值
pub type BandValues = BTreeMap<String, f64>;

/// 指数计算函数
pub type IndexFn = fn(&BandValues) -> Option<f64>;

fn band(values: &BandValues, name: &str) -> Option<f64> {
    values.get(name).copied().filter(|v| v.is_finite())
}

fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        numerator
    } else {
        numerator / denominator
    }
}

/// 归一化植被指数
pub fn ndvi(values: &BandValues) -> Option<f64> {
    let (nir, red) = (band(values, "nir")?, band(values, "red")?);
    Some(safe_ratio(nir - red, nir + red))
}

/// 归一化水体指数
pub fn ndwi(values: &BandValues) -> Option<f64> {
    let (green, nir) = (band(values, "green")?, band(values, "nir")?);
    Some(safe_ratio(green - nir, green + nir))
}

/// 增强型植被指数
pub fn evi(values: &BandValues) -> Option<f64> {
    let (nir, red, blue) = (band(values, "nir")?, band(values, "red")?, band(values, "blue")?);
    Some(2.5 * safe_ratio(nir - red, nir + 6.0 * red - 7.5 * blue))
}

/// 土壤调节植被指数 (L = 0.5)
pub fn savi(values: &BandValues) -> Option<f64> {
    let (nir, red) = (band(values, "nir")?, band(values, "red")?);
    Some(1.5 * safe_ratio(nir - red, nir + red + 0.5))
}

/// 改进归一化水体指数
pub fn mndwi(values: &BandValues) -> Option<f64> {
    let (green, swir) = (band(values, "green")?, band(values, "swir")?);
    Some(safe_ratio(green - swir, green + swir))
}

// ==========================================
// IndexRegistry
// ==========================================
#[derive(Clone, Default)]
pub struct IndexRegistry {
    functions: BTreeMap<String, IndexFn>,
}

impl IndexRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register("ndvi", ndvi);
        registry.register("ndwi", ndwi);
        registry.register("evi", evi);
        registry.register("savi", savi);
        registry.register("mndwi", mndwi);
        registry
    }

    pub fn register(&mut self, name: &str, f: IndexFn) {
        self.functions.insert(name.to_ascii_lowercase(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    /// 计算选定指数（None 表示全部）；无法计算的指数不出现在结果中
    pub fn compute(&self, values: &BandValues, selected: Option<&[String]>) -> BTreeMap<String, f64> {
        let names: Vec<String> = match selected {
            Some(list) => list.iter().map(|n| n.to_ascii_lowercase()).collect(),
            None => self.names(),
        };

        names
            .into_iter()
            .filter_map(|name| {
                let f = self.functions.get(&name)?;
                let v = f(values)?;
                v.is_finite().then_some((name, v))
            })
            .collect()
    }
}
