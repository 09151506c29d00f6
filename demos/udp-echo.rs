use libqio::{
    io_queue::{AddressFamily, SockType},
    ControlPlane, SoftDriver, UringQueue,
};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cfg = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/qio.yaml".to_string());
    let control = ControlPlane::new(&cfg, SoftDriver::new()).expect("Failed to provision devices.");

    let io = UringQueue::new().expect("Failed to set up io_uring.");
    let mut su = control
        .service_unit(0, io)
        .expect("Failed to create service unit.");

    let qd = su
        .open_socket(AddressFamily::Inet6, SockType::Datagram, None)
        .expect("Failed to create UDP socket.");
    su.bind(qd, "[::]:9092".parse().unwrap())
        .expect("Failed to bind UDP socket.");

    println!("Listening for UDP messages on: {:?}", su.local_addr(qd));

    loop {
        let pop = su.pop(qd).expect("Failed to pop.");
        let sga = loop {
            match su.wait(pop) {
                Err(e) if e.is_timeout() => continue,
                Ok(res) => break res.into_sga(),
                Err(e) => {
                    println!("Failed to receive data from remote: {}", e);
                    break None;
                }
            }
        };
        let Some(sga) = sga else {
            continue;
        };

        println!(
            "Received {} bytes from {:?} message: {}",
            sga.total_len(),
            sga.addr(),
            String::from_utf8_lossy(&sga.to_vec())
        );

        let addr = sga.addr();
        let push = su.push(qd, sga).expect("Failed to push.");
        loop {
            match su.wait(push) {
                Err(e) if e.is_timeout() => continue,
                Ok(res) => println!("Sent {:?} to {:?}.", res.value, addr),
                Err(e) => println!("Failed to send data to remote: {}", e),
            }
            break;
        }
    }
}
