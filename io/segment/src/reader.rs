use crate::retriever::BlockDataRetriever;
use crate::slice_list::{ByteSliceList, NodeId};
use std::io::{self, Read, Seek, SeekFrom};

/// Byte-stream view of a [`ByteSliceList`].
///
/// Positions are relative to the start of the list's range. Blocks are pulled
/// from the retriever only as reads reach them.
pub struct ByteSliceReader<R> {
    list: ByteSliceList<R>,
    position: u64,
    cursor: NodeId,
}

impl<R: BlockDataRetriever> ByteSliceReader<R> {
    pub fn new(list: ByteSliceList<R>) -> Self {
        let cursor = list.head();
        Self {
            list,
            position: 0,
            cursor,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn list(&self) -> &ByteSliceList<R> {
        &self.list
    }

    pub fn into_inner(self) -> ByteSliceList<R> {
        self.list
    }

    fn node_for(&self, offset: u64) -> Option<NodeId> {
        if self.list.node(self.cursor).contains(offset) {
            return Some(self.cursor);
        }
        // reads mostly move forward, so try the cursor's successor first
        if let Some(next) = self.list.node(self.cursor).next()
            && self.list.node(next).contains(offset)
        {
            return Some(next);
        }
        self.list.find_node(offset)
    }
}

impl<R: BlockDataRetriever> Read for ByteSliceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.list.size() {
            return Ok(0);
        }
        let offset = self.list.offset() + self.position;
        let Some(node) = self.node_for(offset) else {
            return Ok(0);
        };
        let node = self.list.get_slice(offset, node).map_err(io::Error::from)?;
        self.cursor = node;

        let slice = self.list.node(node);
        let data = slice.data().unwrap_or_default();
        let skip = (offset - slice.offset()) as usize;
        let n = buf.len().min(data.len() - skip);
        buf[..n].copy_from_slice(&data[skip..skip + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: BlockDataRetriever> Seek for ByteSliceReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.list.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
