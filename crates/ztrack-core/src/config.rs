//! 拖拽配置

use crate::error::Result;
use crate::math::Vector3;
use serde::{Deserialize, Serialize};

/// 切换到旋转拖拽的修饰键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotateModifier {
    #[default]
    Alt,
    Ctrl,
    Shift,
}

/// 拖拽会话配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DragConfig {
    /// 平移步长，0 表示连续
    pub translate_increment: f64,
    /// 旋转步长（弧度），0 表示连续
    pub rotate_increment: f64,
    /// 平移约束轴
    pub lock_axis: Option<Vector3>,
    pub translation_enabled: bool,
    pub rotation_enabled: bool,
    /// 拖拽时显示引导线
    pub show_drag_line: bool,
    pub rotate_modifier: RotateModifier,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            translate_increment: 0.0,
            rotate_increment: 0.0,
            lock_axis: None,
            translation_enabled: true,
            rotation_enabled: true,
            show_drag_line: true,
            rotate_modifier: RotateModifier::Alt,
        }
    }
}

impl DragConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DragConfig::from_json_str(
            r#"{
                "rotate_increment": 0.5,
                "lock_axis": [1.0, 0.0, 0.0],
                "rotate_modifier": "ctrl"
            }"#,
        )
        .unwrap();

        assert_eq!(config.rotate_increment, 0.5);
        assert_eq!(config.lock_axis, Some(Vector3::new(1.0, 0.0, 0.0)));
        assert_eq!(config.rotate_modifier, RotateModifier::Ctrl);
        assert!(config.translation_enabled);
        assert_eq!(config.translate_increment, 0.0);
    }

    #[test]
    fn test_invalid_json() {
        assert!(DragConfig::from_json_str("{ \"rotate_increment\": \"fast\" }").is_err());
    }
}
