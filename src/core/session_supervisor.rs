//! 会话监管：生成任务的取消令牌层级
//!
//! 会话持有根 CancellationToken；每次生成派生一个子 token，stop 只取消当前生成，shutdown 取消全部。

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：根令牌 + 当前生成的子令牌
#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    current: Option<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            current: None,
        }
    }

    /// 为新的生成派生子 token；上一代 token 会被取消
    pub fn begin_generation(&mut self) -> CancellationToken {
        if let Some(prev) = self.current.take() {
            prev.cancel();
        }
        let token = self.root.child_token();
        self.current = Some(token.clone());
        token
    }

    /// 取消当前生成（用户 Stop）
    pub fn interrupt(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    /// 取消所有生成（退出）
    pub fn shutdown(&mut self) {
        self.current = None;
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_cancels_only_current() {
        let mut sup = SessionSupervisor::new();
        let first = sup.begin_generation();
        sup.interrupt();
        assert!(first.is_cancelled());
        let second = sup.begin_generation();
        assert!(!second.is_cancelled());
        assert!(!sup.is_shut_down());
    }

    #[test]
    fn test_new_generation_cancels_previous() {
        let mut sup = SessionSupervisor::new();
        let first = sup.begin_generation();
        let second = sup.begin_generation();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_shutdown_cancels_children() {
        let mut sup = SessionSupervisor::new();
        let token = sup.begin_generation();
        sup.shutdown();
        assert!(token.is_cancelled());
        assert!(sup.is_shut_down());
    }
}
