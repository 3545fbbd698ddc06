//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`].
//!
//! - On `espidf`, backs onto real NVS (`nvs_flash_init`/`nvs_open`), matching
//!   the teacher firmware's namespace-isolation and atomic-commit approach.
//! - On host, an in-memory `HashMap` stands in, so tests run unmodified
//!   against the same port trait.

use crate::config::MeshConfig;
use crate::error::{ConfigError, StorageError};
use crate::ports::{ConfigPort, StoragePort};
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "mesh";
const CONFIG_KEY: &str = "cfg";
pub const NODE_ID_NAMESPACE: &str = "mesh";
pub const NODE_ID_KEY: &str = "id";

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init/nvs_flash_erase run once from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                let ret2 = unsafe { nvs_flash_erase() };
                if ret2 != ESP_OK {
                    return Err(ConfigError::ValidationFailed);
                }
                let ret3 = unsafe { nvs_flash_init() };
                if ret3 != ESP_OK {
                    return Err(ConfigError::ValidationFailed);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::ValidationFailed);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{namespace}::{key}")
    }

    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let mut ns_buf = [0u8; 16];
        let ns_bytes = namespace.as_bytes();
        let len = ns_bytes.len().min(15);
        ns_buf[..len].copy_from_slice(&ns_bytes[..len]);

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        // SAFETY: ns_buf is nul-padded and within NVS's 15-char namespace limit.
        let open_ret = unsafe { nvs_open(ns_buf.as_ptr().cast(), mode, &mut handle) };
        if open_ret != ESP_OK {
            return Err(open_ret);
        }
        let result = f(handle);
        unsafe { nvs_close(handle) };
        result
    }
}

impl StoragePort for NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let store = self.store.borrow();
        let value = store
            .get(&Self::composite_key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }

    #[cfg(target_os = "espidf")]
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let mut key_buf = [0i8; 16];
        let key_bytes = key.as_bytes();
        let klen = key_bytes.len().min(15);
        for i in 0..klen {
            key_buf[i] = key_bytes[i] as i8;
        }
        Self::with_nvs_handle(namespace, false, |handle| {
            let mut len: usize = buf.len();
            let ret = unsafe {
                nvs_get_blob(handle, key_buf.as_ptr(), buf.as_mut_ptr().cast(), &mut len)
            };
            if ret == ESP_OK {
                Ok(len)
            } else {
                Err(ret)
            }
        })
        .map_err(|_| StorageError::NotFound)
    }

    #[cfg(not(target_os = "espidf"))]
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut key_buf = [0i8; 16];
        let key_bytes = key.as_bytes();
        let klen = key_bytes.len().min(15);
        for i in 0..klen {
            key_buf[i] = key_bytes[i] as i8;
        }
        Self::with_nvs_handle(namespace, true, |handle| {
            let ret = unsafe {
                nvs_set_blob(handle, key_buf.as_ptr(), data.as_ptr().cast(), data.len())
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            let commit_ret = unsafe { nvs_commit(handle) };
            if commit_ret == ESP_OK {
                Ok(())
            } else {
                Err(commit_ret)
            }
        })
        .map_err(|_| StorageError::Full)
    }

    #[cfg(not(target_os = "espidf"))]
    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store
            .borrow()
            .contains_key(&Self::composite_key(namespace, key))
    }

    #[cfg(target_os = "espidf")]
    fn exists(&self, namespace: &str, key: &str) -> bool {
        let mut buf = [0u8; 256];
        self.read(namespace, key, &mut buf).is_ok()
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> MeshConfig {
        let mut buf = [0u8; 256];
        match self.read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(n) => postcard::from_bytes(&buf[..n]).unwrap_or_default(),
            Err(_) => MeshConfig::default(),
        }
    }

    fn save(&mut self, config: &MeshConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let mut buf = [0u8; 256];
        let encoded =
            postcard::to_slice(config, &mut buf).map_err(|_| ConfigError::ValidationFailed)?;
        self.write(CONFIG_NAMESPACE, CONFIG_KEY, encoded)
            .map_err(|_| ConfigError::ValidationFailed)
    }
}

/// Reject obviously-broken config before it is ever persisted, so a
/// malformed remote write can't silently brick duty-cycle enforcement.
fn validate_config(config: &MeshConfig) -> Result<(), ConfigError> {
    if config.dc_cap_ms <= 0 || config.dc_borrow_ms < 0 {
        return Err(ConfigError::ValidationFailed);
    }
    if config.radio_spreading_factor < 6 || config.radio_spreading_factor > 12 {
        return Err(ConfigError::ValidationFailed);
    }
    if config.max_misses == 0 {
        return Err(ConfigError::ValidationFailed);
    }
    Ok(())
}
