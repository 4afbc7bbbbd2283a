mod ordinary;
mod ticktock;
