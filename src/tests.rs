use rocket::http::Status;
use rocket::local::blocking::Client;

use crate::api;

#[test]
fn live_reports_ok_without_touching_dependencies() {
    let rocket = rocket::build().mount("/", api::health_routes());
    let client = Client::tracked(rocket).expect("valid rocket instance");

    let response = client.get("/live").dispatch();

    assert_eq!(response.status(), Status::Ok);
    let body = response.into_string().expect("response body");
    assert!(body.contains("\"status\":\"ok\""));
}
