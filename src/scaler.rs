use crate::error::{Error, Result};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Loaded scaler stores, keyed by file path. Never invalidated.
static SCALER_CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<ScalerStore>>>> = OnceLock::new();

/// Affine `(min, max)` normalization of one channel. Always invertible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "[f32; 2]")]
pub struct MinMaxScaler {
    min: f32,
    max: f32,
}

impl From<MinMaxScaler> for [f32; 2] {
    fn from(s: MinMaxScaler) -> Self {
        [s.min, s.max]
    }
}

impl MinMaxScaler {
    /// Rejects parameters that cannot be inverted (`min == max` or non-finite).
    pub fn new(channel: &str, min: f32, max: f32) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min == max {
            return Err(Error::DegenerateScaler {
                channel: channel.to_string(),
                min,
                max,
            });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    fn range(&self) -> f32 {
        self.max - self.min
    }

    pub fn scale(&self, values: &[f32]) -> Vec<f32> {
        let range = self.range();
        values.iter().map(|&x| (x - self.min) / range).collect()
    }

    pub fn unscale(&self, values: &[f32]) -> Vec<f32> {
        let range = self.range();
        values.iter().map(|&s| s * range + self.min).collect()
    }
}

/// Per-channel scalers persisted from training, e.g. `{"ppg": [min, max], ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScalerStore {
    channels: HashMap<String, MinMaxScaler>,
}

impl ScalerStore {
    pub fn new(channels: HashMap<String, MinMaxScaler>) -> Self {
        Self { channels }
    }

    pub fn from_json(json: &str, path: &Path) -> Result<Self> {
        let params: HashMap<String, [f32; 2]> =
            serde_json::from_str(json).map_err(|source| Error::ScalerFormat {
                path: path.to_path_buf(),
                source,
            })?;
        let channels = params
            .into_iter()
            .map(|(channel, [min, max])| {
                let scaler = MinMaxScaler::new(&channel, min, max)?;
                Ok((channel, scaler))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self::new(channels))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| Error::ScalerIo {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_json(&json, path)?;
        debug!(
            "Loaded scaler {} with channels {:?}",
            path.display(),
            store.channels.keys().collect::<Vec<_>>()
        );
        Ok(store)
    }

    /// Load once per process; later calls for the same path reuse the first load.
    pub fn load_cached(path: &Path) -> Result<Arc<Self>> {
        let cache = SCALER_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        let mut cache = cache
            .lock()
            .map_err(|_| Error::Config("scaler cache lock poisoned".into()))?;
        if let Some(store) = cache.get(path) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(Self::load(path)?);
        cache.insert(path.to_path_buf(), Arc::clone(&store));
        Ok(store)
    }

    pub fn channel(&self, name: &str) -> Result<&MinMaxScaler> {
        self.channels
            .get(name)
            .ok_or_else(|| Error::MissingScalerChannel(name.to_string()))
    }

    pub fn scale_channel(&self, name: &str, values: &[f32]) -> Result<Vec<f32>> {
        Ok(self.channel(name)?.scale(values))
    }

    /// Map model-space values (e.g. predicted `abp`) back to physical units.
    pub fn unscale_channel(&self, name: &str, values: &[f32]) -> Result<Vec<f32>> {
        Ok(self.channel(name)?.unscale(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCALER_JSON: &str = r#"{"ppg": [-2.0, 3.0], "vpg": [-0.5, 0.5], "apg": [-0.1, 0.1], "abp": [40.0, 190.0]}"#;

    #[test]
    fn scale_then_unscale_round_trips() {
        let scaler = MinMaxScaler::new("ppg", -2.0, 3.0).unwrap();
        let values = [-7.5, -2.0, 0.0, 0.3, 3.0, 1234.5];
        let round = scaler.unscale(&scaler.scale(&values));
        for (a, b) in values.iter().zip(round.iter()) {
            assert!((a - b).abs() <= 1e-3 * a.abs().max(1.0));
        }
        assert_eq!(scaler.scale(&[-2.0, 3.0]), vec![0.0, 1.0]);
    }

    #[test]
    fn store_parses_channel_pairs() {
        let store = ScalerStore::from_json(SCALER_JSON, Path::new("mem")).unwrap();
        assert_eq!(store.channel("ppg").unwrap().min(), -2.0);
        assert_eq!(store.channel("ppg").unwrap().max(), 3.0);
        let abp = store.unscale_channel("abp", &[0.0, 0.5, 1.0]).unwrap();
        assert_eq!(abp, vec![40.0, 115.0, 190.0]);
    }

    #[test]
    fn degenerate_parameters_are_rejected() {
        let err = ScalerStore::from_json(r#"{"ppg": [1.0, 1.0]}"#, Path::new("mem")).unwrap_err();
        assert!(matches!(err, Error::DegenerateScaler { ref channel, .. } if channel == "ppg"));
    }

    #[test]
    fn constructor_rejects_uninvertible_parameters() {
        assert!(matches!(
            MinMaxScaler::new("abp", 80.0, 80.0),
            Err(Error::DegenerateScaler { ref channel, .. }) if channel == "abp"
        ));
        assert!(MinMaxScaler::new("ppg", f32::NAN, 1.0).is_err());
        assert!(MinMaxScaler::new("ppg", 0.0, f32::INFINITY).is_err());
        assert!(MinMaxScaler::new("ppg", 1.0, 0.0).is_ok());
    }

    #[test]
    fn missing_channel_is_an_error() {
        let store = ScalerStore::from_json(r#"{"ppg": [0.0, 1.0]}"#, Path::new("mem")).unwrap();
        assert!(matches!(
            store.scale_channel("apg", &[1.0]),
            Err(Error::MissingScalerChannel(_))
        ));
    }

    #[test]
    fn missing_and_malformed_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(ScalerStore::load(&missing), Err(Error::ScalerIo { .. })));

        let malformed = dir.path().join("bad.json");
        std::fs::write(&malformed, "not json").unwrap();
        assert!(matches!(
            ScalerStore::load(&malformed),
            Err(Error::ScalerFormat { .. })
        ));
    }

    #[test]
    fn cached_load_reuses_the_first_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCALER_JSON.as_bytes()).unwrap();

        let first = ScalerStore::load_cached(file.path()).unwrap();
        std::fs::write(file.path(), r#"{"ppg": [0.0, 10.0]}"#).unwrap();
        let second = ScalerStore::load_cached(file.path()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.channel("ppg").unwrap().max(), 3.0);
    }
}
