#[rocket::launch]
fn rocket() -> _ {
    let rocket = mailflow_api::rocket();
    log::info!("starting mailflow API server");
    rocket
}
