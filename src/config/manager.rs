//! 配置管理器 - 负责按运行环境叠加配置
//!
//! 环境由 `FLARE_ENV` 指定（默认 `development`），对应文件
//! `config/environments/{environment}.toml` 中出现的字段覆盖基础配置，
//! 未出现的字段保持不变。

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use super::StompCoreConfig;

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 FLARE_ENV 获取，未设置时为 "development"
    pub fn get_environment() -> String {
        env::var("FLARE_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 加载当前环境的配置并叠加到基础配置上
    ///
    /// 环境配置文件不存在时不做任何修改
    pub fn load_environment_config(base_config: &mut StompCoreConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);

        if !Path::new(&env_config_path).exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&env_config_path)
            .with_context(|| format!("unable to read environment config: {}", env_config_path))?;
        let overlay: Value = toml::from_str(&content)
            .with_context(|| format!("invalid environment config: {}", env_config_path))?;

        Self::apply_overlay(base_config, overlay)
    }

    /// 将 TOML 覆盖值合并进配置
    pub fn apply_overlay(base_config: &mut StompCoreConfig, overlay: Value) -> Result<()> {
        let mut merged =
            Value::try_from(&*base_config).context("unable to serialize base config")?;
        merge_value(&mut merged, overlay);
        *base_config = merged
            .try_into()
            .context("invalid configuration after applying environment overlay")?;
        Ok(())
    }
}

/// 递归合并：表按键合并，其余类型直接覆盖
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
