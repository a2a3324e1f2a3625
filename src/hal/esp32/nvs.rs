//! Parameter store on the default NVS partition.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::EspError;

use crate::traits::ParamStore;

/// [`ParamStore`] backed by NVS blobs.
///
/// Each call opens the namespace, so one store serves every namespace the
/// coordinator uses.
///
/// # Example
///
/// ```ignore
/// use esp_idf_svc::nvs::EspDefaultNvsPartition;
/// use trolley_core::hal::esp32::NvsParamStore;
///
/// let store = NvsParamStore::new(EspDefaultNvsPartition::take()?);
/// ```
pub struct NvsParamStore {
    partition: EspDefaultNvsPartition,
}

impl NvsParamStore {
    /// Wrap the default partition.
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self { partition }
    }

    fn open(&self, namespace: &str) -> Result<EspNvs<NvsDefault>, EspError> {
        EspNvs::new(self.partition.clone(), namespace, true)
    }
}

impl ParamStore for NvsParamStore {
    type Error = EspError;

    fn load(&mut self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<Option<usize>, EspError> {
        let nvs = self.open(namespace)?;
        Ok(nvs.get_raw(key, buf)?.map(|data| data.len()))
    }

    fn store(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), EspError> {
        let mut nvs = self.open(namespace)?;
        nvs.set_raw(key, data)?;
        Ok(())
    }

    fn erase(&mut self, namespace: &str, key: &str) -> Result<(), EspError> {
        let mut nvs = self.open(namespace)?;
        nvs.remove(key)?;
        Ok(())
    }
}
