use std::net::SocketAddr;

use libqio::{
    io_queue::{AddressFamily, SockType},
    ControlPlane, LoopbackFabric, LoopbackQueue, QResult, QToken, ServiceUnit, SgArray,
    SoftDriver,
};

fn spin(su: &mut ServiceUnit<LoopbackQueue>, qt: QToken) -> libqio::Result<QResult> {
    loop {
        match su.wait(qt) {
            Err(e) if e.is_timeout() => continue,
            other => return other,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let cfg = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/qio.yaml".to_string());

    // Any configuration error terminates the process right here.
    let control = ControlPlane::new(&cfg, SoftDriver::new()).expect("Failed to provision devices.");
    println!(
        "Provisioned {} service units, logging to {}",
        control.num_service_units(),
        control.log_dir().display()
    );

    // Both units share one in process fabric, so they can reach each other.
    let fabric = LoopbackFabric::new();
    let mut server = control
        .service_unit(0, LoopbackQueue::new(fabric.clone()))
        .expect("Failed to create server unit.");
    let mut client = control
        .service_unit(1, LoopbackQueue::new(fabric))
        .expect("Failed to create client unit.");

    let addr: SocketAddr = "127.0.0.1:9092".parse().unwrap();
    let sqd = server
        .open_socket(AddressFamily::Inet, SockType::Datagram, None)
        .expect("Failed to open server socket.");
    server.bind(sqd, addr).expect("Failed to bind server socket.");

    let cqd = client
        .open_socket(AddressFamily::Inet, SockType::Datagram, None)
        .expect("Failed to open client socket.");
    client.connect(cqd, addr).expect("Failed to connect client.");

    for msg in ["Hello", "from", "the client!"] {
        let request = server.pop(sqd).expect("Failed to pop.");
        let push = client
            .push(cqd, SgArray::from_slice(msg.as_bytes()).unwrap())
            .expect("Failed to push.");
        spin(&mut client, push).expect("Failed to send request.");

        let sga = spin(&mut server, request)
            .expect("Failed to receive request.")
            .into_sga()
            .unwrap();
        println!(
            "Server received {} bytes from {:?} message: {}",
            sga.total_len(),
            sga.addr(),
            String::from_utf8_lossy(&sga.to_vec())
        );

        // Pushing the received array echoes it back to its sender.
        let reply = client.pop(cqd).expect("Failed to pop.");
        let echo = server.push(sqd, sga).expect("Failed to push.");
        spin(&mut server, echo).expect("Failed to send reply.");

        let sga = spin(&mut client, reply)
            .expect("Failed to receive reply.")
            .into_sga()
            .unwrap();
        println!("Client response: {}", String::from_utf8_lossy(&sga.to_vec()));
        sga.release();
    }

    println!("Buffers still checked out: {}", control.pool().in_use());
}
