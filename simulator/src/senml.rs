use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SenmlPayload {
    pub device_info: DeviceInfo,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub uuid: String,
    pub fw_ver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Measure {
    pub n: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vb: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bt: Option<f64>,
}

impl Measure {
    pub fn number(n: &str, v: f64) -> Self {
        Self {
            n: n.to_string(),
            v: Some(v),
            ..Default::default()
        }
    }

    pub fn text(n: &str, vs: String) -> Self {
        Self {
            n: n.to_string(),
            vs: Some(vs),
            ..Default::default()
        }
    }

    pub fn flag(n: &str, vb: bool) -> Self {
        Self {
            n: n.to_string(),
            vb: Some(vb),
            ..Default::default()
        }
    }

    pub fn at(mut self, offset_secs: f64) -> Self {
        self.t = Some(offset_secs);
        self
    }
}
