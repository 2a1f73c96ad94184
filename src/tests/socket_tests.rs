use crate::interface::errnos::Errno;
use crate::interface::{self, helper_thread, RustDuration, SockaddrStorage};
use crate::libos::constants::*;
use crate::libos::epoll::EpollItem;
use crate::libos::handle::HandleRef;
use crate::libos::socket::{
    accept, bind, connect, create_socket, getsockopt, listen, recvmsg, sendmsg, setsockopt,
    shutdown, SockState,
};
use crate::libos::unix::{fixup_sockaddr_un_path, unaddr_to_sockname};
use crate::tests::{abstract_addr, pathname_addr};

fn stream_socket() -> HandleRef {
    create_socket(AF_UNIX, SOCK_STREAM, 0).unwrap()
}

// bind + listen on a pathname address, then connect a fresh socket and
// accept the server end of the connection.
fn connected_pair(path: &str) -> (HandleRef, HandleRef, HandleRef) {
    let listener = stream_socket();
    bind(&listener, &pathname_addr(path)).unwrap();
    listen(&listener, 5).unwrap();

    let client = stream_socket();
    connect(&client, &pathname_addr(path)).unwrap();
    let server = accept(&listener, false).unwrap();
    (listener, client, server)
}

#[test]
fn ut_socket_create_rejects_unsupported_requests() {
    assert_eq!(create_socket(AF_INET, SOCK_STREAM, 0).err().unwrap(), -(Errno::EAFNOSUPPORT as i32));
    assert_eq!(create_socket(AF_UNIX, SOCK_DGRAM, 0).err().unwrap(), -(Errno::EPROTONOSUPPORT as i32));
    assert_eq!(create_socket(AF_UNIX, SOCK_STREAM, 6).err().unwrap(), -(Errno::EPROTONOSUPPORT as i32));
}

#[test]
fn ut_socket_digest_names_are_deterministic() {
    let name = unaddr_to_sockname(&pathname_addr("/tmp/ut_digest.sock")).unwrap();
    assert_eq!(name.len(), 64);
    assert!(name.bytes().all(|b| b.is_ascii_hexdigit()));
    assert_eq!(name, unaddr_to_sockname(&pathname_addr("/tmp/ut_digest.sock")).unwrap());

    // different paths diverge
    assert_ne!(name, unaddr_to_sockname(&pathname_addr("/tmp/ut_digest2.sock")).unwrap());

    // a pathname and an abstract name with the same bytes are distinct
    // addresses (the abstract one hashes its leading null byte too)
    assert_ne!(
        name,
        unaddr_to_sockname(&abstract_addr(b"/tmp/ut_digest.sock")).unwrap()
    );

    // garbage after the pathname terminator does not change the name
    let mut noisy = pathname_addr("/tmp/ut_digest.sock");
    noisy.extend_from_slice(b"GARBAGE");
    assert_eq!(name, unaddr_to_sockname(&noisy).unwrap());
}

#[test]
fn ut_socket_digest_rejects_malformed_addresses() {
    assert_eq!(unaddr_to_sockname(&[]).unwrap_err(), -(Errno::EINVAL as i32));
    assert_eq!(
        unaddr_to_sockname(&(AF_UNIX as u16).to_ne_bytes()).unwrap_err(),
        -(Errno::EINVAL as i32)
    );

    let mut wrong_family = pathname_addr("/tmp/ut_family.sock");
    wrong_family[..2].copy_from_slice(&(AF_INET as u16).to_ne_bytes());
    assert_eq!(unaddr_to_sockname(&wrong_family).unwrap_err(), -(Errno::EAFNOSUPPORT as i32));
}

#[test]
fn ut_socket_fixup_trims_pathname_garbage() {
    let mut noisy = pathname_addr("/tmp/ut_fixup.sock");
    noisy.extend_from_slice(b"leftover junk");
    let mut stored = SockaddrStorage::from_bytes(&noisy);
    fixup_sockaddr_un_path(&mut stored);
    assert_eq!(stored.as_bytes(), &pathname_addr("/tmp/ut_fixup.sock")[..]);

    // abstract names keep every byte, trailing nulls included
    let raw = abstract_addr(b"ut_fixup\0trailing");
    let mut stored = SockaddrStorage::from_bytes(&raw);
    fixup_sockaddr_un_path(&mut stored);
    assert_eq!(stored.as_bytes(), &raw[..]);
}

#[test]
fn ut_socket_bind_stores_normalized_local_addr() {
    let listener = stream_socket();
    let mut noisy = pathname_addr("/tmp/ut_bind_addr.sock");
    noisy.extend_from_slice(b"uninitialized tail");
    bind(&listener, &noisy).unwrap();

    let inner = listener.sock().lock();
    assert_eq!(inner.state, SockState::Bound);
    assert!(inner.was_bound);
    assert_eq!(inner.local_addr.family(), AF_UNIX as u16);
    assert_eq!(inner.local_addr.as_bytes(), &pathname_addr("/tmp/ut_bind_addr.sock")[..]);
    assert!(inner.remote_addr.is_empty());
}

#[test]
fn ut_socket_bind_conflict_leaves_loser_untouched() {
    let winner = stream_socket();
    bind(&winner, &pathname_addr("/tmp/ut_bind_conflict.sock")).unwrap();

    let loser = stream_socket();
    assert_eq!(
        bind(&loser, &pathname_addr("/tmp/ut_bind_conflict.sock")).unwrap_err(),
        -(Errno::EADDRINUSE as i32)
    );
    let inner = loser.sock().lock();
    assert_eq!(inner.state, SockState::New);
    assert!(!inner.was_bound);
    assert!(inner.local_addr.is_empty());
    drop(inner);

    // a second bind on any socket is EINVAL regardless of the address
    assert_eq!(
        bind(&winner, &pathname_addr("/tmp/ut_bind_conflict2.sock")).unwrap_err(),
        -(Errno::EINVAL as i32)
    );
}

#[test]
fn ut_socket_address_is_reusable_after_close() {
    let addr = pathname_addr("/tmp/ut_rebind.sock");
    let first = stream_socket();
    bind(&first, &addr).unwrap();
    drop(first);

    let second = stream_socket();
    bind(&second, &addr).unwrap();
}

#[test]
fn ut_socket_listen_requires_bound_state() {
    let sock = stream_socket();
    assert_eq!(listen(&sock, 5).unwrap_err(), -(Errno::EINVAL as i32));

    bind(&sock, &pathname_addr("/tmp/ut_listen.sock")).unwrap();
    listen(&sock, 5).unwrap();
    assert_eq!(sock.sock().lock().state, SockState::Listening);
    // idempotent on an already listening socket
    listen(&sock, 10).unwrap();
}

#[test]
fn ut_socket_accept_requires_listening_state() {
    let sock = stream_socket();
    assert_eq!(accept(&sock, false).err().unwrap(), -(Errno::EINVAL as i32));
    bind(&sock, &pathname_addr("/tmp/ut_accept_state.sock")).unwrap();
    assert_eq!(accept(&sock, false).err().unwrap(), -(Errno::EINVAL as i32));
}

#[test]
fn ut_socket_connect_to_absent_address_fails() {
    let sock = stream_socket();
    assert_eq!(
        connect(&sock, &pathname_addr("/tmp/ut_no_listener.sock")).unwrap_err(),
        -(Errno::ENOENT as i32)
    );
    // the failed connect left the socket fresh
    assert_eq!(sock.sock().lock().state, SockState::New);
}

#[test]
fn ut_socket_connect_state_machine() {
    let (_listener, client, _server) = connected_pair("/tmp/ut_connect_state.sock");
    assert_eq!(
        connect(&client, &pathname_addr("/tmp/ut_connect_state.sock")).unwrap_err(),
        -(Errno::EISCONN as i32)
    );

    // a bound socket cannot connect
    let bound = stream_socket();
    bind(&bound, &pathname_addr("/tmp/ut_connect_bound.sock")).unwrap();
    assert_eq!(
        connect(&bound, &pathname_addr("/tmp/ut_connect_state.sock")).unwrap_err(),
        -(Errno::EINVAL as i32)
    );
    assert_eq!(bound.sock().lock().state, SockState::Bound);
}

#[test]
fn ut_socket_end_to_end_transfer() {
    let (listener, client, server) = connected_pair("/tmp/ut_e2e.sock");

    assert_eq!(sendmsg(&client, &[b"0123456789"]).unwrap(), 10);
    let mut buf = [0u8; 32];
    assert_eq!(recvmsg(&server, &mut [&mut buf[..]], false, false).unwrap(), 10);
    assert_eq!(&buf[..10], b"0123456789");

    // and the other direction
    assert_eq!(sendmsg(&server, &[b"ack"]).unwrap(), 3);
    assert_eq!(recvmsg(&client, &mut [&mut buf[..]], false, false).unwrap(), 3);
    assert_eq!(&buf[..3], b"ack");

    // the accepted socket inherited the listener's local address and an
    // anonymous peer identity
    let server_inner = server.sock().lock();
    assert_eq!(server_inner.state, SockState::Connected);
    assert_eq!(
        server_inner.local_addr.as_bytes(),
        listener.sock().lock().local_addr.as_bytes()
    );
    assert_eq!(server_inner.remote_addr.as_bytes(), &(AF_UNIX as u16).to_ne_bytes());
}

#[test]
fn ut_socket_abstract_addresses_connect() {
    let listener = stream_socket();
    bind(&listener, &abstract_addr(b"ut_abstract")).unwrap();
    listen(&listener, 5).unwrap();

    let client = stream_socket();
    connect(&client, &abstract_addr(b"ut_abstract")).unwrap();
    let server = accept(&listener, false).unwrap();

    sendmsg(&client, &[b"over abstract"]).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(recvmsg(&server, &mut [&mut buf[..]], false, false).unwrap(), 13);
    assert_eq!(&buf[..13], b"over abstract");
}

#[test]
fn ut_socket_unconnected_io_reports_enotconn() {
    let sock = stream_socket();
    assert_eq!(sendmsg(&sock, &[b"data"]).unwrap_err(), -(Errno::ENOTCONN as i32));
    let mut buf = [0u8; 4];
    assert_eq!(
        recvmsg(&sock, &mut [&mut buf[..]], false, false).unwrap_err(),
        -(Errno::ENOTCONN as i32)
    );
}

#[test]
fn ut_socket_scatter_gather_io() {
    let (_listener, client, server) = connected_pair("/tmp/ut_scatter.sock");

    // a scatter list with an empty middle segment is sent as one stream
    assert_eq!(sendmsg(&client, &[b"01234", b"", b"56789ab"]).unwrap(), 12);

    let mut seg_a = [0u8; 4];
    let mut seg_b = [0u8; 4];
    let mut seg_c = [0u8; 4];
    let read = recvmsg(
        &server,
        &mut [&mut seg_a[..], &mut seg_b[..], &mut seg_c[..]],
        false,
        false,
    )
    .unwrap();
    assert_eq!(read, 12);
    assert_eq!(&seg_a, b"0123");
    assert_eq!(&seg_b, b"4567");
    assert_eq!(&seg_c, b"89ab");
}

#[test]
fn ut_socket_peek_does_not_consume() {
    let (_listener, client, server) = connected_pair("/tmp/ut_peek.sock");
    sendmsg(&client, &[b"abcdef"]).unwrap();

    let mut peeked = [0u8; 4];
    assert_eq!(recvmsg(&server, &mut [&mut peeked[..]], true, false).unwrap(), 4);
    assert_eq!(&peeked, b"abcd");

    // peeking again returns the same bytes
    let mut peeked_again = [0u8; 4];
    assert_eq!(recvmsg(&server, &mut [&mut peeked_again[..]], true, false).unwrap(), 4);
    assert_eq!(&peeked_again, b"abcd");

    // the consuming read sees the stream from the start, in order
    let mut buf = [0u8; 16];
    let mut total = 0;
    while total < 6 {
        total += recvmsg(&server, &mut [&mut buf[total..]], false, false).unwrap();
    }
    assert_eq!(&buf[..6], b"abcdef");
}

#[test]
fn ut_socket_peek_empty_stream_propagates_error() {
    let (_listener, _client, server) = connected_pair("/tmp/ut_peek_empty.sock");
    let mut buf = [0u8; 4];
    assert_eq!(
        recvmsg(&server, &mut [&mut buf[..]], true, true).unwrap_err(),
        -(Errno::EAGAIN as i32)
    );
}

#[test]
fn ut_socket_nonblocking_accept_and_recv() {
    let listener = stream_socket();
    bind(&listener, &pathname_addr("/tmp/ut_nonblock.sock")).unwrap();
    listen(&listener, 5).unwrap();
    assert_eq!(accept(&listener, true).err().unwrap(), -(Errno::EAGAIN as i32));

    let client = stream_socket();
    connect(&client, &pathname_addr("/tmp/ut_nonblock.sock")).unwrap();
    let server = accept(&listener, false).unwrap();

    // per-call nonblocking recv on an empty stream, independent of the
    // handle's own blocking mode
    let mut buf = [0u8; 8];
    assert!(!server.is_nonblocking());
    assert_eq!(
        recvmsg(&server, &mut [&mut buf[..]], false, true).unwrap_err(),
        -(Errno::EAGAIN as i32)
    );

    // the handle-level flag has the same effect on a plain recv
    client.set_nonblocking(true);
    assert_eq!(
        recvmsg(&client, &mut [&mut buf[..]], false, false).unwrap_err(),
        -(Errno::EAGAIN as i32)
    );
}

#[test]
fn ut_socket_blocking_accept_waits_for_connect() {
    let listener = stream_socket();
    bind(&listener, &pathname_addr("/tmp/ut_blocking_accept.sock")).unwrap();
    listen(&listener, 5).unwrap();

    let connector = helper_thread(|| {
        interface::sleep(RustDuration::from_millis(30));
        let client = stream_socket();
        connect(&client, &pathname_addr("/tmp/ut_blocking_accept.sock")).unwrap();
        sendmsg(&client, &[b"hello"]).unwrap();
        interface::sleep(RustDuration::from_millis(100));
    });

    let server = accept(&listener, false).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(recvmsg(&server, &mut [&mut buf[..]], false, false).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    connector.join().unwrap();
}

#[test]
fn ut_socket_peer_close_gives_eof() {
    let (_listener, client, server) = connected_pair("/tmp/ut_eof.sock");
    sendmsg(&client, &[b"bye"]).unwrap();
    drop(client);

    let mut buf = [0u8; 8];
    assert_eq!(recvmsg(&server, &mut [&mut buf[..]], false, false).unwrap(), 3);
    assert_eq!(recvmsg(&server, &mut [&mut buf[..]], false, false).unwrap(), 0);
    assert_eq!(sendmsg(&server, &[b"anyone?"]).unwrap_err(), -(Errno::EPIPE as i32));
}

#[test]
fn ut_socket_shutdown_paths() {
    let (_listener, client, server) = connected_pair("/tmp/ut_shutdown.sock");

    shutdown(&client, SHUT_WR).unwrap();
    assert_eq!(sendmsg(&client, &[b"late"]).unwrap_err(), -(Errno::EPIPE as i32));
    // the read side still works
    sendmsg(&server, &[b"ok"]).unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(recvmsg(&client, &mut [&mut buf[..]], false, false).unwrap(), 2);

    shutdown(&client, SHUT_RD).unwrap();
    assert_eq!(recvmsg(&client, &mut [&mut buf[..]], false, false).unwrap(), 0);

    assert_eq!(shutdown(&client, 42).unwrap_err(), -(Errno::EINVAL as i32));

    // shutdown needs a connected or listening socket
    let fresh = stream_socket();
    assert_eq!(shutdown(&fresh, SHUT_RDWR).unwrap_err(), -(Errno::ENOTCONN as i32));
}

#[test]
fn ut_socket_epoll_items_are_woken_on_state_changes() {
    let listener = stream_socket();
    let item = EpollItem::new();
    listener.register_epoll_item(item.clone());
    assert_eq!(item.wakeups(), 0);

    bind(&listener, &pathname_addr("/tmp/ut_epoll.sock")).unwrap();
    assert_eq!(item.wakeups(), 1);
    listen(&listener, 5).unwrap();

    let client = stream_socket();
    let client_item = EpollItem::new();
    client.register_epoll_item(client_item.clone());
    connect(&client, &pathname_addr("/tmp/ut_epoll.sock")).unwrap();
    assert_eq!(client_item.wakeups(), 1);

    listener.unregister_epoll_item(&item);
    assert!(listener.epoll_items().is_empty());
}

#[test]
fn ut_socket_sockopt_surface() {
    let (listener, client, _server) = connected_pair("/tmp/ut_sockopt.sock");

    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_TYPE).unwrap(), SOCK_STREAM);
    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_DOMAIN).unwrap(), AF_UNIX);
    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_PROTOCOL).unwrap(), 0);
    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_ACCEPTCONN).unwrap(), 0);
    assert_eq!(getsockopt(&listener, SOL_SOCKET, SO_ACCEPTCONN).unwrap(), 1);

    // timeouts round-trip through the socket state
    setsockopt(&client, SOL_SOCKET, SO_RCVTIMEO, 250_000).unwrap();
    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_RCVTIMEO).unwrap(), 250_000);
    setsockopt(&client, SOL_SOCKET, SO_SNDTIMEO, 125_000).unwrap();
    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_SNDTIMEO).unwrap(), 125_000);

    // SO_ERROR reads and clears the sticky error
    client.sock().lock().last_error = Errno::ECONNRESET as i32;
    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_ERROR).unwrap(), Errno::ECONNRESET as i32);
    assert_eq!(getsockopt(&client, SOL_SOCKET, SO_ERROR).unwrap(), 0);

    // everything else falls through to the (empty) UNIX option table
    assert_eq!(
        getsockopt(&client, SOL_SOCKET, SO_SNDBUF).unwrap_err(),
        -(Errno::ENOPROTOOPT as i32)
    );
    assert_eq!(
        setsockopt(&client, SOL_SOCKET, SO_REUSEADDR, 1).unwrap_err(),
        -(Errno::ENOPROTOOPT as i32)
    );
}
