//! The emulator behind the real transaction server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;

use sem_core::{CommandDecoder, RequestFrame, ResponseLayout, RuleTable};
use sem_emulator::{spawn, Emulator};
use sem_server::config::EmulatorConfig;
use sem_server::framing::{read_response, write_request};
use sem_server::{ServerContext, StatePublisher, TransactionHandler, TransactionServer};

#[tokio::test]
async fn test_inquiry_and_fixed_size_reads_over_tcp() {
    // Arrange
    let log_dir = tempfile::tempdir().unwrap();
    let (handle, _task) = spawn(Emulator::new(
        &EmulatorConfig::default(),
        StatePublisher::default(),
    ));
    let context = ServerContext {
        decoder: CommandDecoder::new(RuleTable::empty()),
        layout: ResponseLayout::Legacy,
        session_log_dir: log_dir.path().to_path_buf(),
    };
    let server = TransactionServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        context,
        Arc::new(handle) as Arc<dyn TransactionHandler>,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(server.run(Arc::clone(&running)));
    let mut shim = TcpStream::connect(addr).await.unwrap();

    // Act: INQUIRY with a larger allocation than the 36 natural bytes.
    write_request(&mut shim, &RequestFrame::read(vec![0x12, 0, 0, 0, 0x60, 0], 96))
        .await
        .unwrap();
    let inquiry = read_response(&mut shim, ResponseLayout::Legacy).await.unwrap();

    // An unknown read declaring 8 bytes.
    write_request(&mut shim, &RequestFrame::read(vec![0xCE, 0x00, 0x00, 0x08], 8))
        .await
        .unwrap();
    let unknown = read_response(&mut shim, ResponseLayout::Legacy).await.unwrap();

    // Assert
    assert_eq!(inquiry.status, 1);
    assert_eq!(inquiry.data.len(), 96);
    assert_eq!(&inquiry.data[8..12], b"JEOL");
    assert!(inquiry.data[36..].iter().all(|&b| b == 0));
    assert_eq!(unknown.data, vec![0; 8]);

    running.store(false, Ordering::Relaxed);
}
