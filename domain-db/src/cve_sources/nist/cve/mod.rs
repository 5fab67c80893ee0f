use serde::{Deserialize, Deserializer, Serialize};

/// One element of the `vulnerabilities` list of an NVD 2.0 response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Vulnerability {
    pub cve: Cve,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Cve {
    pub id: String,
    pub published: String,
    #[serde(rename = "lastModified")]
    pub last_modified: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub descriptions: Vec<Description>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metrics: Metrics,
    #[serde(default, deserialize_with = "null_as_default")]
    pub references: Vec<Reference>,
}

// NVD sends `null` for some empty blocks.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Description {
    pub lang: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Reference {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct Metrics {
    #[serde(rename = "cvssMetricV31", default)]
    pub cvss_metric_v31: Option<Vec<CvssMetricV3>>,
    #[serde(rename = "cvssMetricV30", default)]
    pub cvss_metric_v30: Option<Vec<CvssMetricV3>>,
    #[serde(rename = "cvssMetricV2", default)]
    pub cvss_metric_v2: Option<Vec<CvssMetricV2>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CvssMetricV3 {
    #[serde(rename = "cvssData")]
    pub cvss_data: CvssV3,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CvssV3 {
    #[serde(rename = "baseScore")]
    pub base_score: f64,
    #[serde(rename = "baseSeverity", default)]
    pub base_severity: Option<String>,
}

// v2 keeps its severity next to `cvssData`, not inside it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CvssMetricV2 {
    #[serde(rename = "cvssData")]
    pub cvss_data: CvssV2,
    #[serde(rename = "baseSeverity", default)]
    pub base_severity: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CvssV2 {
    #[serde(rename = "baseScore")]
    pub base_score: f64,
}

/// The scoring schemas a record may carry.
#[derive(Debug, Clone, Copy)]
pub enum CvssMetric<'a> {
    V31(&'a CvssMetricV3),
    V30(&'a CvssMetricV3),
    V2(&'a CvssMetricV2),
}

/// Base score and severity taken from a single metric entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub base_score: f64,
    pub base_severity: Option<String>,
}

impl CvssMetric<'_> {
    pub fn score(&self) -> Score {
        match self {
            Self::V31(metric) | Self::V30(metric) => Score {
                base_score: metric.cvss_data.base_score,
                base_severity: metric.cvss_data.base_severity.clone(),
            },
            Self::V2(metric) => Score {
                base_score: metric.cvss_data.base_score,
                base_severity: metric.base_severity.clone(),
            },
        }
    }
}

pub type Probe = for<'a> fn(&'a Metrics) -> Option<CvssMetric<'a>>;

/// v3 schemas in order of preference, newer minor revision first.
pub const V3_PROBES: &[Probe] = &[probe_v31, probe_v30];

pub const V2_PROBES: &[Probe] = &[probe_v2];

// An empty list counts as absent.
fn probe_v31(metrics: &Metrics) -> Option<CvssMetric<'_>> {
    metrics
        .cvss_metric_v31
        .as_deref()
        .and_then(<[_]>::first)
        .map(CvssMetric::V31)
}

fn probe_v30(metrics: &Metrics) -> Option<CvssMetric<'_>> {
    metrics
        .cvss_metric_v30
        .as_deref()
        .and_then(<[_]>::first)
        .map(CvssMetric::V30)
}

fn probe_v2(metrics: &Metrics) -> Option<CvssMetric<'_>> {
    metrics
        .cvss_metric_v2
        .as_deref()
        .and_then(<[_]>::first)
        .map(CvssMetric::V2)
}

/// Run `probes` in order and return the first metric found.
pub fn resolve<'a>(metrics: &'a Metrics, probes: &[Probe]) -> Option<CvssMetric<'a>> {
    probes.iter().find_map(|probe| probe(metrics))
}

impl Cve {
    /// The English description, else the first one, else nothing.
    pub fn summary(&self) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|d| d.lang == "en")
            .or_else(|| self.descriptions.first())
            .map(|d| d.value.as_str())
    }

    pub fn cvss_v3(&self) -> Option<CvssMetric<'_>> {
        resolve(&self.metrics, V3_PROBES)
    }

    pub fn cvss_v2(&self) -> Option<CvssMetric<'_>> {
        resolve(&self.metrics, V2_PROBES)
    }

    /// Reference URLs in source order, entries without one are skipped.
    pub fn reference_urls(&self) -> impl Iterator<Item = &str> {
        self.references.iter().filter_map(|r| r.url.as_deref())
    }
}
