use webhook_relay::{compute_signature, verify_webhook_request, DEFAULT_SIGNATURE_HEADER};

fn main() {
    let payload = br#"{"event":"invoice.paid","invoiceId":123}"#;
    let signature = compute_signature(b"supersecret", payload);

    let headers = vec![
        ("content-type", "application/json"),
        ("x-relay-signature", signature.as_str()),
    ];

    match verify_webhook_request(headers, payload, b"supersecret", DEFAULT_SIGNATURE_HEADER) {
        Ok(()) => println!("signature valid"),
        Err(err) => println!("rejected: {err}"),
    }
}
