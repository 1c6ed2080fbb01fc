//! Lazily materialized view over a logical byte range.
//!
//! A [`ByteSliceList`] starts as a single node covering the whole range and
//! holding no data. Asking for the slice at an offset pulls exactly one block
//! from the retriever and splits the node around it, so a consumer seeking
//! through a large file only ever touches the blocks it actually reads.
//!
//! ```text
//!   [ 0 ............................................ 100 )   unmaterialized
//!
//!   get_slice(40)  with 32 byte blocks:
//!
//!   [ 0 .... 32 ) -> [ 32 ==== 64 ) -> [ 64 ........ 100 )
//!    unmaterialized     materialized     unmaterialized
//! ```

use crate::error::{ReadError, ReadResult};
use crate::retriever::{BlockData, BlockDataRetriever};
use std::fmt;

/// Index of a node within its list.
///
/// Ids stay valid until [`ByteSliceList::clear`]; splitting a node keeps its
/// id for the front part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// One contiguous logical range, either materialized or not.
pub struct SliceNode {
    offset: u64,
    size: u64,
    data_size: u64,
    data: Option<BlockData>,
    data_start: usize,
    next: Option<NodeId>,
}

impl SliceNode {
    fn unmaterialized(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            data_size: 0,
            data: None,
            data_start: 0,
            next: None,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Bytes of this node backed by data.
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn is_materialized(&self) -> bool {
        self.data.is_some()
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.offset <= offset && offset < self.end()
    }

    /// The node's bytes, once materialized.
    pub fn data(&self) -> Option<&[u8]> {
        let data = self.data.as_ref()?;
        Some(&data.data()[self.data_start..self.data_start + self.data_size as usize])
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }
}

impl fmt::Debug for SliceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceNode")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("data_size", &self.data_size)
            .field("next", &self.next)
            .finish()
    }
}

/// Chain of nodes covering `[offset, offset + size)` of a retriever's stream.
pub struct ByteSliceList<R> {
    retriever: R,
    offset: u64,
    size: u64,
    nodes: Vec<SliceNode>,
    tail: NodeId,
}

const HEAD: NodeId = NodeId(0);

impl<R: BlockDataRetriever> ByteSliceList<R> {
    /// A list over `[offset, offset + size)`.
    ///
    /// The range must be non-empty and inside the retriever's logical stream.
    pub fn new(retriever: R, offset: u64, size: u64) -> ReadResult<Self> {
        let length = retriever.logical_length();
        let end = offset
            .checked_add(size)
            .ok_or_else(|| ReadError::BadArgument("slice range overflows".into()))?;
        if size == 0 || end > length {
            return Err(ReadError::BadArgument(format!(
                "slice [{offset}, {end}) outside stream of {length} bytes"
            )));
        }
        Ok(Self {
            retriever,
            offset,
            size,
            nodes: vec![SliceNode::unmaterialized(offset, size)],
            tail: HEAD,
        })
    }

    /// A list over the retriever's entire stream.
    pub fn whole(retriever: R) -> ReadResult<Self> {
        let length = retriever.logical_length();
        Self::new(retriever, 0, length)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn head(&self) -> NodeId {
        HEAD
    }

    pub fn tail(&self) -> NodeId {
        self.tail
    }

    pub fn node(&self, id: NodeId) -> &SliceNode {
        &self.nodes[id.0]
    }

    pub fn retriever(&self) -> &R {
        &self.retriever
    }

    /// Nodes in logical order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SliceNode)> {
        std::iter::successors(Some(HEAD), |id| self.nodes[id.0].next)
            .map(|id| (id, &self.nodes[id.0]))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total bytes backed by data across all nodes.
    pub fn materialized_bytes(&self) -> u64 {
        self.nodes.iter().map(|n| n.data_size).sum()
    }

    /// The node whose range contains `offset`.
    pub fn find_node(&self, offset: u64) -> Option<NodeId> {
        self.iter().find(|(_, n)| n.contains(offset)).map(|(id, _)| id)
    }

    /// Warm the retriever for the whole range.
    pub fn prefetch(&mut self) -> ReadResult<()> {
        let size = usize::try_from(self.size).unwrap_or(usize::MAX);
        self.retriever.prefetch(self.offset, size)
    }

    /// Materialize the data at `wanted` within `node`.
    ///
    /// Returns the node now holding `wanted`, which is `node` itself unless
    /// an unmaterialized head had to be split off in front of it. Calling
    /// again for an offset that is already materialized does nothing.
    pub fn get_slice(&mut self, wanted: u64, node: NodeId) -> ReadResult<NodeId> {
        let current = &self.nodes[node.0];
        if !current.contains(wanted) {
            return Err(ReadError::BadArgument(format!(
                "offset {wanted} outside node [{}, {})",
                current.offset,
                current.end()
            )));
        }
        if current.is_materialized() {
            return Ok(node);
        }

        let block = self.retriever.retrieve_block_data(wanted)?.ok_or_else(|| {
            ReadError::Corrupted(format!("stream ended before offset {wanted}"))
        })?;
        if !block.contains(wanted) {
            return Err(ReadError::Corrupted(format!(
                "block [{}, {}) does not hold offset {wanted}",
                block.start(),
                block.end()
            )));
        }

        let mut target = node;
        if block.start() > self.nodes[node.0].offset {
            target = self.split(node, block.start());
        }

        let node_offset = self.nodes[target.0].offset;
        let node_end = self.nodes[target.0].end();
        let covered = node_end.min(block.end()) - node_offset;
        if covered < self.nodes[target.0].size {
            self.split(target, node_offset + covered);
        }

        let slot = &mut self.nodes[target.0];
        slot.data_start = (node_offset - block.start()) as usize;
        slot.data_size = covered;
        slot.data = Some(block);
        Ok(target)
    }

    /// The node after `node`, materialized.
    ///
    /// An unmaterialized `node` is materialized first so the boundary between
    /// the two is known. Returns `None` past the tail.
    pub fn get_next_slice(&mut self, node: NodeId) -> ReadResult<Option<NodeId>> {
        let node = if self.nodes[node.0].is_materialized() {
            node
        } else {
            let offset = self.nodes[node.0].offset;
            self.get_slice(offset, node)?
        };
        let Some(next) = self.nodes[node.0].next else {
            return Ok(None);
        };
        let offset = self.nodes[next.0].offset;
        self.get_slice(offset, next).map(Some)
    }

    /// Drop every node and retrieved block, back to one unmaterialized node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(SliceNode::unmaterialized(self.offset, self.size));
        self.tail = HEAD;
        self.retriever.reset();
    }

    /// Split unmaterialized `node` at `at`, returning the new back part.
    fn split(&mut self, node: NodeId, at: u64) -> NodeId {
        let back = NodeId(self.nodes.len());
        let front = &mut self.nodes[node.0];
        debug_assert!(front.offset < at && at < front.end());
        let mut suffix = SliceNode::unmaterialized(at, front.end() - at);
        suffix.next = front.next.replace(back);
        front.size = at - front.offset;
        self.nodes.push(suffix);
        if self.tail == node {
            self.tail = back;
        }
        back
    }
}

impl<R> fmt::Debug for ByteSliceList<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSliceList")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    /// Hands out fixed-size decoded blocks of a counting byte stream.
    struct Counting {
        block: u64,
        length: u64,
        retrieved: usize,
        resets: usize,
    }

    impl Counting {
        fn new(block: u64, length: u64) -> Self {
            Self {
                block,
                length,
                retrieved: 0,
                resets: 0,
            }
        }
    }

    impl BlockDataRetriever for Counting {
        fn retrieve_block_data(&mut self, offset: u64) -> ReadResult<Option<BlockData>> {
            if offset >= self.length {
                return Ok(None);
            }
            self.retrieved += 1;
            let start = offset / self.block * self.block;
            let end = (start + self.block).min(self.length);
            let bytes: Vec<u8> = (start..end).map(|b| b as u8).collect();
            Ok(Some(BlockData::decoded(start, Bytes::from(bytes))))
        }

        fn prefetch(&mut self, _offset: u64, _length: usize) -> ReadResult<()> {
            Ok(())
        }

        fn reset(&mut self) {
            self.resets += 1;
        }

        fn logical_length(&self) -> u64 {
            self.length
        }
    }

    fn spans<R: BlockDataRetriever>(list: &ByteSliceList<R>) -> Vec<(u64, u64, bool)> {
        list.iter()
            .map(|(_, n)| (n.offset(), n.size(), n.is_materialized()))
            .collect()
    }

    #[test]
    fn test_new_validates_range() {
        assert!(ByteSliceList::new(Counting::new(4, 10), 0, 0).is_err());
        assert!(ByteSliceList::new(Counting::new(4, 10), 6, 5).is_err());
        assert!(ByteSliceList::new(Counting::new(4, 10), u64::MAX, 2).is_err());
        let list = ByteSliceList::whole(Counting::new(4, 10)).unwrap();
        assert_eq!(spans(&list), vec![(0, 10, false)]);
    }

    #[test]
    fn test_split_head_and_suffix() {
        let mut list = ByteSliceList::new(Counting::new(32, 100), 0, 100).unwrap();
        let node = list.get_slice(40, list.head()).unwrap();
        assert_ne!(node, list.head());
        assert_eq!(
            spans(&list),
            vec![(0, 32, false), (32, 32, true), (64, 36, false)]
        );
        assert_eq!(list.node(node).data().unwrap()[8], 40);
        assert_eq!(list.node(list.tail()).offset(), 64);
    }

    #[test]
    fn test_repeat_is_noop() {
        let mut list = ByteSliceList::new(Counting::new(8, 40), 4, 30).unwrap();
        let first = list.get_slice(5, list.head()).unwrap();
        let before = spans(&list);
        let again = list.get_slice(7, first).unwrap();
        assert_eq!(first, again);
        assert_eq!(spans(&list), before);
        assert_eq!(list.retriever().retrieved, 1);
        // node starts mid-block: data view begins at the node offset
        assert_eq!(list.node(first).data().unwrap(), &[4, 5, 6, 7]);
    }

    #[test]
    fn test_walk_preserves_span() {
        let mut list = ByteSliceList::new(Counting::new(8, 50), 3, 45).unwrap();
        let mut materialized = 0;
        let mut node = Some(list.get_slice(3, list.head()).unwrap());
        while let Some(id) = node {
            let now = list.materialized_bytes();
            assert!(now >= materialized);
            materialized = now;
            node = list.get_next_slice(id).unwrap();
        }
        assert_eq!(list.materialized_bytes(), 45);
        let total: u64 = list.iter().map(|(_, n)| n.size()).sum();
        assert_eq!(total, 45);
        let bytes: Vec<u8> = list
            .iter()
            .flat_map(|(_, n)| n.data().unwrap().to_vec())
            .collect();
        assert_eq!(bytes, (3..48).map(|b| b as u8).collect::<Vec<_>>());
        assert_eq!(list.node(list.tail()).end(), 48);
    }

    #[test]
    fn test_next_of_unmaterialized_node() {
        let mut list = ByteSliceList::new(Counting::new(10, 30), 0, 30).unwrap();
        let next = list.get_next_slice(list.head()).unwrap().unwrap();
        assert_eq!(list.node(next).offset(), 10);
        assert!(list.node(list.head()).is_materialized());
        assert_eq!(list.node(list.tail()).offset(), 20);
    }

    #[test]
    fn test_out_of_node_offset() {
        let mut list = ByteSliceList::new(Counting::new(10, 30), 0, 30).unwrap();
        let node = list.get_slice(15, list.head()).unwrap();
        let err = list.get_slice(25, node).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BadArgument);
        assert_eq!(list.find_node(25), Some(list.tail()));
    }

    #[test]
    fn test_clear() {
        let mut list = ByteSliceList::new(Counting::new(4, 16), 0, 16).unwrap();
        list.get_slice(9, list.head()).unwrap();
        assert_eq!(list.len(), 3);
        list.clear();
        assert_eq!(spans(&list), vec![(0, 16, false)]);
        assert_eq!(list.materialized_bytes(), 0);
        assert_eq!(list.retriever().resets, 1);
        assert_eq!(list.tail(), list.head());
    }
}
