//! Store layout of every entity the engine reads or writes

use crate::types::AccountId;

/// Risk score collection
pub const RISK_SCORES: &str = "risk_score";
/// Enforcement record collection
pub const ENFORCEMENTS: &str = "enforcements";
/// Flag collection
pub const USER_FLAGS: &str = "user_flags";
/// Account profile collection
pub const USERS: &str = "users";
/// Ride collection
pub const RIDES: &str = "rides";
/// Cancellation window collection
pub const CANCELLATIONS: &str = "cancellations";
/// Latest location collection
pub const LOCATIONS: &str = "locations";
/// Location history collection
pub const LOCATIONS_HISTORY: &str = "locations_history";
/// One-time-code collection
pub const RIDE_OTPS: &str = "ride_otps";
/// Issuance quota collection
pub const OTP_GEN_META: &str = "otp_gen_meta";

/// `risk_score/{account}`
pub fn risk_score(account: &AccountId) -> String {
    format!("{}/{}", RISK_SCORES, account)
}

/// `enforcements/{account}`
pub fn enforcement(account: &AccountId) -> String {
    format!("{}/{}", ENFORCEMENTS, account)
}

/// `user_flags/{account}`
pub fn flags(account: &AccountId) -> String {
    format!("{}/{}", USER_FLAGS, account)
}

/// `users/{account}/deviceIds`
pub fn device_ids(account: &AccountId) -> String {
    format!("{}/{}/deviceIds", USERS, account)
}

/// `users/{account}/phone`
pub fn phone(account: &AccountId) -> String {
    format!("{}/{}/phone", USERS, account)
}

/// `rides/{ride}`
pub fn ride(ride_id: &str) -> String {
    format!("{}/{}", RIDES, ride_id)
}

/// `locations/{account}`
pub fn location(account: &AccountId) -> String {
    format!("{}/{}", LOCATIONS, account)
}

/// `locations_history/{account}`
pub fn location_history(account: &AccountId) -> String {
    format!("{}/{}", LOCATIONS_HISTORY, account)
}

/// `ride_otps/{subject}`
pub fn otp(subject: &str) -> String {
    format!("{}/{}", RIDE_OTPS, subject)
}

/// `ride_otps/{subject}/attempts`
pub fn otp_attempts(subject: &str) -> String {
    format!("{}/{}/attempts", RIDE_OTPS, subject)
}

/// `otp_gen_meta/{issuer}`
pub fn issuance_quota(issuer: &AccountId) -> String {
    format!("{}/{}", OTP_GEN_META, issuer)
}
