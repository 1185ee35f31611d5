//! Recipes for the packages berth knows how to make portable.

pub mod openssl;
pub mod ruby;
pub mod zlib;
