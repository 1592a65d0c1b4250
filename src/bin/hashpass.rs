use argon2::{Argon2, PasswordHasher};
use argon2::password_hash::{SaltString, rand_core::OsRng};

// Mint an Argon2 PHC string for seeding salon_user.password_hash.
fn main() {
    let password = std::env::args().nth(1).expect("Usage: hashpass <password>");
    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string();
    println!("{phc}");
}
