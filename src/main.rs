#[rocket::launch]
fn rocket() -> _ {
    case_api::rocket()
}
