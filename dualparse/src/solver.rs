//! 双対分解で組み合わせる2つの部分問題のソルバー。
//!
//! - [`Arborescence`]: 辺の重み行列に対する最大全域有向木（Chu-Liu-Edmonds法）
//! - [`HeadProblem`]: 主辞ごとの祖父母・兄弟連鎖の最適割り当て

mod arborescence;
mod head_automaton;

pub use arborescence::{Arborescence, RootPolicy, TreeSolution};
pub use head_automaton::{HeadProblem, HeadSolution};
