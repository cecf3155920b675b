/// 令牌分配器 - 线程安全
///
/// Tokens only need to be unique among calls pending for the same
/// route and service; the pending table rejects collisions on insert
/// and the caller retries with the next token.

use std::sync::atomic::{AtomicU16, Ordering};

use serde::{Deserialize, Serialize};

/// 令牌分配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStrategy {
    /// Wrapping counter starting at 1
    #[default]
    Sequential,
    /// Uniformly random non-zero token
    Random,
}

#[derive(Debug)]
pub struct TokenAllocator {
    strategy: TokenStrategy,
    counter: AtomicU16,
}

impl TokenAllocator {
    pub fn new(strategy: TokenStrategy) -> Self {
        Self {
            strategy,
            counter: AtomicU16::new(1),
        }
    }

    pub fn strategy(&self) -> TokenStrategy {
        self.strategy
    }

    /// 获取下一个令牌，从不返回0
    pub fn next_token(&self) -> u16 {
        match self.strategy {
            TokenStrategy::Sequential => loop {
                let token = self.counter.fetch_add(1, Ordering::Relaxed);
                if token != 0 {
                    return token;
                }
            },
            TokenStrategy::Random => loop {
                let token = rand::random::<u16>();
                if token != 0 {
                    return token;
                }
            },
        }
    }
}

impl Default for TokenAllocator {
    fn default() -> Self {
        Self::new(TokenStrategy::default())
    }
}
