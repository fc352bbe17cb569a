//! Route segment trees and the tree differ.

pub mod differ;
pub mod node;
