//! 动态叠加文字与肯定语轮播

use rand::Rng;
use serde::Serialize;

use crate::core::task_scheduler::pick_excluding;

/// 叠加文字的显示位置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayPosition {
    TopLeft,
    TopRight,
    Center,
    BottomLeft,
    BottomRight,
}

impl OverlayPosition {
    pub const ALL: [OverlayPosition; 5] = [
        OverlayPosition::TopLeft,
        OverlayPosition::TopRight,
        OverlayPosition::Center,
        OverlayPosition::BottomLeft,
        OverlayPosition::BottomRight,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OverlayState {
    pub text: String,
    pub version: u64,
    pub position: OverlayPosition,
}

impl OverlayState {
    /// 下一个叠加状态：版本 +1，位置与上一次不同
    pub fn next<R: Rng + ?Sized>(previous: Option<&OverlayState>, text: String, rng: &mut R) -> Self {
        let previous_position = previous.map(|p| p.position);
        let position = pick_excluding(&OverlayPosition::ALL, previous_position.as_ref(), rng)
            .unwrap_or(OverlayPosition::Center);
        Self {
            text,
            version: previous.map_or(1, |p| p.version + 1),
            position,
        }
    }
}

/// 肯定语顺序轮播，到末尾后回到开头
#[derive(Clone, Debug, Default)]
pub struct AffirmationRotation {
    items: Vec<String>,
    next: usize,
    current: Option<usize>,
}

impl AffirmationRotation {
    pub fn new(items: Vec<String>) -> Self {
        Self {
            items,
            next: 0,
            current: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 前进一步并返回新的当前项
    pub fn advance(&mut self) -> Option<&str> {
        if self.items.is_empty() {
            return None;
        }
        let index = self.next;
        self.next = (index + 1) % self.items.len();
        self.current = Some(index);
        self.current()
    }

    pub fn current(&self) -> Option<&str> {
        self.current
            .and_then(|i| self.items.get(i))
            .map(String::as_str)
    }
}
