pub mod city;
pub mod trip;
pub mod user;
