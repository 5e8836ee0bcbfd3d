//! 路径与请求参数校验

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{AppError, Result};

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]{0,63}$").expect("static id pattern")
});

/// 用户/人格 ID：字母数字开头，最长 64 个字符
pub fn validate_id(field: &str, value: &str) -> Result<()> {
    if ID_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Field '{}' is not a valid identifier: {}",
            field, value
        )))
    }
}

/// 心率采样必须是有限正数
pub fn validate_bpm(bpm: f32) -> Result<()> {
    if bpm.is_finite() && bpm > 0.0 && bpm < 400.0 {
        Ok(())
    } else {
        Err(AppError::Validation(format!("bpm out of range: {}", bpm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("user-42", true)]
    #[case("persona.nova", true)]
    #[case("a", true)]
    #[case("", false)]
    #[case("-leading", false)]
    #[case("has space", false)]
    #[case("semi;colon", false)]
    fn test_validate_id(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(validate_id("user_id", value).is_ok(), ok);
    }

    #[test]
    fn test_validate_bpm() {
        assert!(validate_bpm(72.0).is_ok());
        assert!(validate_bpm(0.0).is_err());
        assert!(validate_bpm(f32::INFINITY).is_err());
    }
}
