//! Composition helper end-to-end scenarios.
//!
//! `read_exact` / `read_until` / `read_all` collection loops and the
//! `pipe` transfer helper, across memory streams and connected pairs.

use bytestreams::test_utils::init_test_logging;
use bytestreams::{
    pipe, read_all, read_exact, read_until, stream_pair, test_complete, test_phase, ErrorKind,
    IntoHandle, Lab, MemoryStream, PollReactor, ReadStream, Stream, WriteStream,
};
use std::time::Duration;

fn lab() -> (Lab, bytestreams::Handle) {
    init_test_logging();
    let reactor = PollReactor::new().expect("reactor");
    (Lab::new(reactor.handle()), reactor.handle())
}

#[test]
fn read_exact_collects_across_parked_reads() {
    let (mut lab, _handle) = lab();
    test_phase!("read_exact_collects_across_parked_reads");
    let stream = MemoryStream::new(0);

    {
        let stream = stream.clone();
        lab.spawn(async move {
            stream.write(b"abc", Duration::ZERO).await.unwrap();
            stream.write(b"defgh", Duration::ZERO).await.unwrap();
        });
    }
    let out = lab.block_on({
        let stream = stream.clone();
        async move { read_exact(&stream, 8, Duration::ZERO).await.unwrap() }
    });
    assert_eq!(out, b"abcdefgh");
    test_complete!("read_exact_collects_across_parked_reads");
}

#[test]
fn read_exact_zero_is_empty_and_touchless() {
    let (mut lab, _handle) = lab();
    test_phase!("read_exact_zero_is_empty_and_touchless");
    let stream = MemoryStream::new(0);
    let out = lab.block_on({
        let stream = stream.clone();
        async move { read_exact(&stream, 0, Duration::ZERO).await.unwrap() }
    });
    assert!(out.is_empty());
    assert!(stream.is_open());
    test_complete!("read_exact_zero_is_empty_and_touchless");
}

#[test]
fn read_exact_fails_when_the_stream_ends_short() {
    let (mut lab, _handle) = lab();
    test_phase!("read_exact_fails_when_the_stream_ends_short");
    let stream = MemoryStream::new(0);
    let err = lab.block_on({
        let stream = stream.clone();
        async move {
            stream.end(b"abc", Duration::ZERO).await.unwrap();
            read_exact(&stream, 5, Duration::ZERO).await
        }
    });
    assert_eq!(err.unwrap_err().kind(), ErrorKind::Unreadable);
    test_complete!("read_exact_fails_when_the_stream_ends_short");
}

#[test]
fn read_until_matches_multi_byte_needle() {
    let (mut lab, _handle) = lab();
    test_phase!("read_until_matches_multi_byte_needle");
    let stream = MemoryStream::new(0);
    let out = lab.block_on({
        let stream = stream.clone();
        async move {
            stream
                .write(b"header: 1\r\n\r\nbody", Duration::ZERO)
                .await
                .unwrap();
            read_until(&stream, b"\r\n\r\n", 0, Duration::ZERO).await.unwrap()
        }
    });
    // Postcondition: the result ends with the needle.
    assert_eq!(out, b"header: 1\r\n\r\n");
    let rest = lab.block_on(async move { stream.read(0, None, Duration::ZERO).await.unwrap() });
    assert_eq!(rest, b"body");
    test_complete!("read_until_matches_multi_byte_needle");
}

#[test]
fn read_until_stops_at_max_len() {
    let (mut lab, _handle) = lab();
    test_phase!("read_until_stops_at_max_len");
    let stream = MemoryStream::new(0);
    let out = lab.block_on({
        let stream = stream.clone();
        async move {
            stream.write(b"aaaaaaaa", Duration::ZERO).await.unwrap();
            read_until(&stream, b"zz", 3, Duration::ZERO).await.unwrap()
        }
    });
    // Postcondition: no needle, so the length hit max_len exactly.
    assert_eq!(out, b"aaa");
    test_complete!("read_until_stops_at_max_len");
}

#[test]
fn read_until_rejects_empty_needle() {
    let (mut lab, _handle) = lab();
    test_phase!("read_until_rejects_empty_needle");
    let stream = MemoryStream::new(0);
    let err = lab.block_on(async move { read_until(&stream, b"", 0, Duration::ZERO).await });
    assert_eq!(err.unwrap_err().kind(), ErrorKind::InvalidArgument);
    test_complete!("read_until_rejects_empty_needle");
}

#[test]
fn read_until_needle_split_across_chunks() {
    let (mut lab, handle) = lab();
    test_phase!("read_until_needle_split_across_chunks");
    let (a, b) = stream_pair(&handle).expect("pair");

    {
        let a = a.clone();
        lab.spawn(async move {
            a.write(b"part one\r", Duration::ZERO).await.unwrap();
            a.write(b"\npart two", Duration::ZERO).await.unwrap();
        });
    }
    let out = lab.block_on({
        let b = b.clone();
        async move { read_until(&b, b"\r\n", 0, Duration::ZERO).await.unwrap() }
    });
    assert_eq!(out, b"part one\r\n");
    test_complete!("read_until_needle_split_across_chunks");
}

#[test]
fn read_all_drains_to_eof() {
    let (mut lab, handle) = lab();
    test_phase!("read_all_drains_to_eof");
    let (a, b) = stream_pair(&handle).expect("pair");

    {
        let a = a.clone();
        lab.spawn(async move {
            a.write(b"first ", Duration::ZERO).await.unwrap();
            a.end(b"second", Duration::ZERO).await.unwrap();
        });
    }
    let out = lab.block_on(async move { read_all(&b, 0, Duration::ZERO).await.unwrap() });
    assert_eq!(out, b"first second");
    test_complete!("read_all_drains_to_eof");
}

#[test]
fn read_all_respects_max_len() {
    let (mut lab, _handle) = lab();
    test_phase!("read_all_respects_max_len");
    let stream = MemoryStream::new(0);
    let out = lab.block_on({
        let stream = stream.clone();
        async move {
            stream.write(b"0123456789", Duration::ZERO).await.unwrap();
            read_all(&stream, 4, Duration::ZERO).await.unwrap()
        }
    });
    assert_eq!(out, b"0123");
    test_complete!("read_all_respects_max_len");
}

#[test]
fn pipe_with_stop_byte_ends_destination_not_source() {
    let (mut lab, handle) = lab();
    test_phase!("pipe_with_stop_byte_ends_destination_not_source");
    let (a, b) = stream_pair(&handle).expect("pair");
    let dst = MemoryStream::new(0);

    let piped = lab.block_on({
        let b = b.clone();
        let dst = dst.clone();
        async move {
            a.write(b"hello!world", Duration::ZERO).await.unwrap();
            pipe(&b, &dst, true, 0, Some(b'!'), Duration::ZERO).await.unwrap()
        }
    });
    assert_eq!(piped, 6);
    assert!(!dst.is_writable(), "destination ended");
    assert!(b.is_readable(), "source stays open");

    let delivered = lab.block_on({
        let dst = dst.clone();
        async move { dst.read(0, None, Duration::ZERO).await.unwrap() }
    });
    assert_eq!(delivered, b"hello!");
    // The bytes past the stop byte stay with the source.
    let rest = lab.block_on(async move { b.read(0, None, Duration::ZERO).await.unwrap() });
    assert_eq!(rest, b"world");
    test_complete!("pipe_with_stop_byte_ends_destination_not_source");
}

#[test]
fn pipe_is_byte_exact_over_bulk_data() {
    let (mut lab, handle) = lab();
    test_phase!("pipe_is_byte_exact_over_bulk_data");
    let (a, b) = stream_pair(&handle).expect("pair");
    let (c, d) = stream_pair(&handle).expect("pair");
    let data: Vec<u8> = (0..(1 << 18)).map(|i| (i % 251) as u8).collect();

    {
        let a = a.clone();
        let data = data.clone();
        lab.spawn(async move {
            a.write(&data, Duration::ZERO).await.unwrap();
            a.end(&[], Duration::ZERO).await.unwrap();
        });
    }
    {
        let b = b.clone();
        let c = c.clone();
        lab.spawn(async move {
            let piped = pipe(&b, &c, true, 0, None, Duration::ZERO).await.unwrap();
            assert_eq!(piped, 1 << 18);
        });
    }
    let received = lab.block_on(async move { read_all(&d, 0, Duration::ZERO).await.unwrap() });
    lab.run_until_idle();
    assert_eq!(received, data);
    test_complete!("pipe_is_byte_exact_over_bulk_data");
}

#[test]
fn pipe_with_length_bound_stops_early() {
    let (mut lab, _handle) = lab();
    test_phase!("pipe_with_length_bound_stops_early");
    let src = MemoryStream::new(0);
    let dst = MemoryStream::new(0);

    let piped = lab.block_on({
        let src = src.clone();
        let dst = dst.clone();
        async move {
            src.write(b"0123456789", Duration::ZERO).await.unwrap();
            pipe(&src, &dst, false, 4, None, Duration::ZERO).await.unwrap()
        }
    });
    assert_eq!(piped, 4);
    assert!(dst.is_writable(), "no end requested");
    let delivered = lab.block_on({
        let dst = dst.clone();
        async move { dst.read(0, None, Duration::ZERO).await.unwrap() }
    });
    assert_eq!(delivered, b"0123");
    test_complete!("pipe_with_length_bound_stops_early");
}

#[test]
fn pipe_error_path_still_ends_destination() {
    let (mut lab, handle) = lab();
    test_phase!("pipe_error_path_still_ends_destination");
    let src = MemoryStream::with_timer(0, handle);
    let dst = MemoryStream::new(0);

    // Nothing ever arrives: the read inside the loop times out.
    let result = lab.block_on({
        let src = src.clone();
        let dst = dst.clone();
        async move { pipe(&src, &dst, true, 0, None, Duration::from_millis(50)).await }
    });
    assert_eq!(result.unwrap_err().kind(), ErrorKind::TimedOut);
    assert!(!dst.is_writable(), "destination ended on the error path");
    assert!(src.is_readable(), "source untouched by the failure");
    test_complete!("pipe_error_path_still_ends_destination");
}

#[test]
fn unwritable_destination_is_normal_completion() {
    let (mut lab, _handle) = lab();
    test_phase!("unwritable_destination_is_normal_completion");
    let src = MemoryStream::new(0);
    let dst = MemoryStream::new(0);

    // A destination that is already ended short-circuits the loop guard;
    // the completion end-handling must not try to end it again.
    let piped = lab.block_on({
        let src = src.clone();
        let dst = dst.clone();
        async move {
            src.write(b"undelivered", Duration::ZERO).await.unwrap();
            dst.end(b"", Duration::ZERO).await.unwrap();
            pipe(&src, &dst, true, 0, None, Duration::ZERO).await
        }
    });
    assert_eq!(piped.unwrap(), 0);
    assert!(src.is_readable(), "source keeps its bytes");
    test_complete!("unwritable_destination_is_normal_completion");
}

#[test]
fn unreadable_source_is_normal_completion() {
    let (mut lab, _handle) = lab();
    test_phase!("unreadable_source_is_normal_completion");
    let src = MemoryStream::new(0);
    let dst = MemoryStream::new(0);

    // A source that is already unreadable short-circuits the loop guard.
    src.close();
    let result = lab.block_on({
        let dst = dst.clone();
        async move { pipe(&src, &dst, true, 0, None, Duration::ZERO).await }
    });
    assert_eq!(result.unwrap(), 0);
    assert!(!dst.is_writable());
    test_complete!("unreadable_source_is_normal_completion");
}
