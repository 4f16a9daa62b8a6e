use corehttpd::{Request, Response, Scope, Server, StatusCode};

fn greeting(_data: &mut (), req: &Request, resp: &mut Response) {
    let segments = req.url.segments();
    let lang = segments.get(1).map(String::as_str);

    let text = match lang {
        Some("en") => r#"{"lang": "en", "text": "Hello, world!"}"#,
        Some("zh") => r#"{"lang": "zh", "text": "你好世界！"}"#,
        Some("es") => r#"{"lang": "es", "text": "¡Hola Mundo!"}"#,
        Some("ar") => r#"{"lang": "ar", "text": "مرحبا بالعالم!"}"#,
        Some("pt") => r#"{"lang": "pt", "text": "Olá, mundo!"}"#,
        Some("hi") => r#"{"lang": "hi", "text": "हैलो वर्ल्ड!"}"#,
        Some("ru") => r#"{"lang": "ru", "text": "Привет, мир!"}"#,
        Some(_) => {
            resp.status(StatusCode::NotFound).set_header("content-type", "application/json");
            resp.body_str(r#"{"error": "Language not supported", "status": "Not Found"}"#);
            return;
        }
        None => r#"{"supported_lang": ["en", "zh", "es", "ar", "pt", "hi", "ru"]}"#,
    };

    resp.status(StatusCode::Ok).set_header("content-type", "application/json");
    resp.body_str(text);
}

fn main() -> std::io::Result<()> {
    let server = Server::<()>::builder()
        .listen("127.0.0.1:8080".parse().unwrap())
        .route("GET", "/api", Scope::Inherit, greeting)
        .build()?;

    let _handle = server.launch()?;
    println!("listening on http://127.0.0.1:8080");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
