//! End-to-end reads through the accessor, retrievers and slice lists.

use block_cache::{BlockCache, BlockCacheConfig};
use segment_reader::{
    ByteSliceList, ByteSliceReader, CompressedLayout, CompressedRetriever, ErrorKind,
    FileAccessor, FileOptions, LocalFsBackend, MemoryBackend, RawRetriever, ReadOption,
    ReadRequest, ReadStats, Scalar, ScalarKind, ZstdDecoder,
};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

fn cache(block_size: usize) -> BlockCache {
    BlockCache::new(
        &BlockCacheConfig::new()
            .with_block_size(block_size)
            .with_memory_budget(block_size * 256)
            .with_shard_bits(2),
    )
    .unwrap()
}

fn bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn open(backend: &MemoryBackend, len: usize, block_size: usize) -> FileAccessor {
    backend.insert("/seg/0", bytes(len));
    FileAccessor::open("/seg/0", backend, cache(block_size), FileOptions::new()).unwrap()
}

fn counted() -> (Arc<ReadStats>, ReadOption) {
    let stats = Arc::new(ReadStats::new());
    let opt = ReadOption::default().with_stats(stats.clone());
    (stats, opt)
}

#[test]
fn read_spanning_two_blocks_misses_both() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 9, 4);
    let (stats, opt) = counted();

    let mut buf = [0u8; 2];
    assert_eq!(file.read(&mut buf, 3, &opt).unwrap(), 2);
    assert_eq!(buf, [3, 4]);
    assert_eq!((stats.hits(), stats.misses()), (0, 2));
}

#[test]
fn second_read_of_same_block_hits() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 9, 4);
    let (stats, opt) = counted();

    let mut one = [0u8; 1];
    file.read(&mut one, 2, &opt).unwrap();
    let (second, second_opt) = counted();
    let mut two = [0u8; 2];
    file.read(&mut two, 2, &second_opt).unwrap();

    assert_eq!(two, [2, 3]);
    assert_eq!(second.hits(), 1);
    assert_eq!(stats.misses() + second.misses(), 1);
}

#[test]
fn prefetch_then_read_hits_everything() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 41, 4);

    let (prefetch, opt) = counted();
    file.prefetch(20, 0, &opt).unwrap();
    assert_eq!(prefetch.misses(), 5);

    let (read, opt) = counted();
    let mut buf = [0u8; 20];
    assert_eq!(file.read(&mut buf, 0, &opt).unwrap(), 20);
    assert_eq!((read.hits(), read.misses()), (5, 0));
    assert_eq!(&buf[..], &bytes(20)[..]);
}

#[test]
fn batch_read_shares_one_fetch() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 16, 4);

    let (mut a, mut b) = ([0u8; 2], [0u8; 2]);
    let mut requests = [ReadRequest::new(0, &mut a), ReadRequest::new(2, &mut b)];
    let results = file.batch_read_ordered(&mut requests, &ReadOption::default());

    assert!(results.iter().all(|r| matches!(r, Ok(2))));
    assert_eq!((a, b), ([0, 1], [2, 3]));
    assert_eq!(backend.read_call_count(), 1);
}

#[test]
fn batch_read_reports_each_request() {
    let backend = MemoryBackend::new();
    backend.insert("/seg/0", bytes(40));
    let file = FileAccessor::open(
        "/seg/0",
        &backend,
        cache(4),
        FileOptions::new().with_batch_size(1),
    )
    .unwrap();
    backend.fail_reads("/seg/0", 20..24);

    let (mut a, mut b, mut c, mut d) = ([0u8; 4], [0u8; 4], [0u8; 8], [0u8; 4]);
    let mut requests = [
        ReadRequest::new(0, &mut a),
        ReadRequest::new(10, &mut b),
        ReadRequest::new(18, &mut c),
        ReadRequest::new(38, &mut d),
    ];
    let results = file.batch_read_ordered(&mut requests, &ReadOption::default());

    assert!(matches!(results[0], Ok(4)));
    assert!(matches!(results[1], Ok(4)));
    assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::Io);
    assert!(matches!(results[3], Ok(2)));
    assert_eq!(b, [10, 11, 12, 13]);
    assert_eq!(&d[..2], &[38, 39]);
}

#[test]
fn misses_coalesce_into_adjacent_runs() {
    let backend = MemoryBackend::new();
    backend.insert("/seg/0", bytes(48));
    let file = FileAccessor::open(
        "/seg/0",
        &backend,
        cache(4),
        FileOptions::new().with_batch_size(4),
    )
    .unwrap();

    let handles = file.get_block_handles(&[5, 6, 7, 10, 11], &ReadOption::default());
    assert!(handles.iter().all(Result::is_ok));

    let calls = backend.read_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[0].offset, calls[0].len), (20, 12));
    assert_eq!((calls[1].offset, calls[1].len), (40, 8));
}

#[test]
fn handles_follow_input_order() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 40, 4);

    let handles = file.get_block_handles(&[7, 1, 7, 3], &ReadOption::default());
    let starts: Vec<u8> = handles.iter().map(|h| h.as_ref().unwrap().data()[0]).collect();
    assert_eq!(starts, vec![28, 4, 28, 12]);
    assert!(handles[0].as_ref().unwrap().ptr_eq(handles[2].as_ref().unwrap()));
}

#[test]
fn failed_fetch_fails_only_its_blocks() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 32, 4);
    backend.fail_reads("/seg/0", 8..12);

    let handles = file.get_block_handles(&[0, 2, 5], &ReadOption::default());
    assert!(handles[0].is_ok());
    assert_eq!(handles[1].as_ref().unwrap_err().kind(), ErrorKind::Io);
    assert!(handles[2].is_ok());

    // the failure is not cached
    backend.clear_faults();
    let retry = file.get_block_handles(&[2], &ReadOption::default());
    assert_eq!(retry[0].as_ref().unwrap().data(), &[8, 9, 10, 11]);
}

#[test]
fn short_fetch_is_corruption() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 16, 4);
    backend.truncate_reads("/seg/0", 4..8);

    let mut buf = [0u8; 4];
    let err = file.read(&mut buf, 4, &ReadOption::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupted);
}

#[test]
fn spent_budget_skips_io() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 16, 4);

    let opt = ReadOption::default().with_timeout(Duration::ZERO);
    let mut buf = [0u8; 8];
    let err = file.read(&mut buf, 0, &opt).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationTimeout);
    assert_eq!(backend.read_call_count(), 0);

    // a later read with time to spare fetches normally
    assert_eq!(file.read(&mut buf, 0, &ReadOption::default()).unwrap(), 8);
}

#[test]
fn read_bounds() {
    let backend = MemoryBackend::new();
    let file = open(&backend, 10, 4);
    let opt = ReadOption::default();

    let mut buf = [0u8; 4];
    assert_eq!(file.read(&mut buf, 6, &opt).unwrap(), 4);
    assert_eq!(file.read(&mut buf, 8, &opt).unwrap(), 2);
    assert_eq!(file.read(&mut buf, 10, &opt).unwrap_err().kind(), ErrorKind::BadArgument);
    assert_eq!(file.read(&mut [], 3, &opt).unwrap(), 0);
    assert_eq!(file.write(b"x", 0).unwrap_err().kind(), ErrorKind::NotSupported);
}

#[test]
fn local_file_reads() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    let data = bytes(1000);
    tmp.write_all(&data).unwrap();
    tmp.flush().unwrap();

    let backend = LocalFsBackend::new();
    let file = FileAccessor::open(tmp.path(), &backend, cache(64), FileOptions::new()).unwrap();
    assert_eq!(file.len(), 1000);

    let mut buf = vec![0u8; 300];
    assert_eq!(file.read(&mut buf, 650, &ReadOption::default()).unwrap(), 300);
    assert_eq!(&buf[..], &data[650..950]);

    let mut tail = vec![0u8; 100];
    assert_eq!(file.read(&mut tail, 950, &ReadOption::default()).unwrap(), 50);
    assert_eq!(&tail[..50], &data[950..]);
}

#[test]
fn scalars_through_cache() {
    let backend = MemoryBackend::new();
    let values: Vec<u8> = (0u32..10).flat_map(u32::to_le_bytes).collect();
    backend.insert("/seg/scalars", values);
    let file =
        FileAccessor::open("/seg/scalars", &backend, cache(16), FileOptions::new()).unwrap();
    let opt = ReadOption::default();

    let read = file.read_scalars(ScalarKind::U32, 8, 3, &opt).unwrap();
    assert_eq!(read, vec![Scalar::U32(2), Scalar::U32(3), Scalar::U32(4)]);
    let err = file.read_scalars(ScalarKind::U64, 32, 2, &opt).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadArgument);
}

#[test]
fn raw_reader_matches_file() {
    let backend = MemoryBackend::new();
    let file = Arc::new(open(&backend, 200, 16));
    let retriever = RawRetriever::new(file, ReadOption::default());
    let mut reader = ByteSliceReader::new(ByteSliceList::new(retriever, 10, 150).unwrap());

    reader.seek(SeekFrom::Start(100)).unwrap();
    let mut buf = [0u8; 10];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &bytes(200)[110..120]);

    reader.rewind().unwrap();
    let mut all = Vec::new();
    reader.read_to_end(&mut all).unwrap();
    assert_eq!(all, bytes(200)[10..160].to_vec());
}

#[test]
fn compressed_reader_decodes_blocks() {
    let plain = bytes(5000);
    let mut stored = Vec::new();
    let mut sizes = Vec::new();
    for chunk in plain.chunks(1024) {
        let frame = zstd::bulk::compress(chunk, 3).unwrap();
        sizes.push(frame.len() as u64);
        stored.extend_from_slice(&frame);
    }

    let backend = MemoryBackend::new();
    backend.insert("/seg/z", stored);
    let file = Arc::new(
        FileAccessor::open(
            "/seg/z",
            &backend,
            cache(256),
            FileOptions::new().with_cache_decoded_blocks(true),
        )
        .unwrap(),
    );
    let layout = Arc::new(CompressedLayout::from_sizes(1024, 5000, 0, &sizes).unwrap());
    let retriever = CompressedRetriever::new(
        file.clone(),
        ReadOption::default(),
        layout,
        Arc::new(ZstdDecoder),
    );
    assert!(retriever.decoded_cache_enabled());

    let mut list = ByteSliceList::whole(retriever).unwrap();
    list.prefetch().unwrap();
    let mut reader = ByteSliceReader::new(list);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, plain);

    // a second pass is served from the decoded cache
    let calls = backend.read_call_count();
    let mut list = reader.into_inner();
    list.clear();
    let mut reader = ByteSliceReader::new(list);
    let mut again = Vec::new();
    reader.read_to_end(&mut again).unwrap();
    assert_eq!(again, plain);
    assert_eq!(backend.read_call_count(), calls);
}
