mod common;
mod negotiation;
mod routing;
mod score_adapter;
