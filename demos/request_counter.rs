use corehttpd::{ConnectionData, Request, Response, Scope, Server, StatusCode};

struct Counter(usize);

impl ConnectionData for Counter {
    fn new() -> Self {
        Counter(0)
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

fn count(counter: &mut Counter, _req: &Request, resp: &mut Response) {
    counter.0 += 1;

    resp.status(StatusCode::Ok).set_header("content-type", "application/json");
    resp.body_str(format!(r#"{{"count_request": {}}}"#, counter.0));
}

fn main() -> std::io::Result<()> {
    let server = Server::<Counter>::builder()
        .listen("127.0.0.1:8080".parse().unwrap())
        .route("GET", "/", Scope::Exact, count)
        .build()?;

    let _handle = server.launch()?;
    println!("listening on http://127.0.0.1:8080");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
