//! API 类型定义

use std::fmt;

/// Return code of `execute_source`; non-zero means the guest raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecStatus(i32);

impl ExecStatus {
    pub const SUCCESS: ExecStatus = ExecStatus(0);

    pub fn from_code(code: i32) -> Self {
        Self(code)
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            f.write_str("ok")
        } else {
            write!(f, "failed ({})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_status() {
        assert!(ExecStatus::SUCCESS.is_success());
        assert!(!ExecStatus::from_code(1).is_success());
        assert_eq!(ExecStatus::from_code(-1).code(), -1);
        assert_eq!(ExecStatus::from_code(2).to_string(), "failed (2)");
        assert_eq!(ExecStatus::SUCCESS.to_string(), "ok");
    }
}
