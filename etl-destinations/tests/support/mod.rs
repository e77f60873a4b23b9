pub mod maxcompute;
