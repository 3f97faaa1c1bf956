mod jwt;

pub use jwt::{
    Error, SessionTokenClaims, SessionTokenHeader, TokenKind, sign_hs256, verify_hs256,
};
